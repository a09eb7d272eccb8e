//! Type system for rivulet streams

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Semantic type of a stream field or expression result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// 32-bit signed integer
    Int,
    /// 64-bit signed integer
    Long,
    /// 32-bit floating point
    Float,
    /// 64-bit floating point
    Double,
    /// Arbitrary-precision decimal
    Precise,
    /// UTF-8 string
    Str,
    /// Boolean
    Bool,
    /// Opaque bytes
    Binary,
    /// Milliseconds since the Unix epoch
    Timestamp,
    /// Type of the `NULL` literal; promotes to every other type
    Null,
}

impl Type {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Type::Int | Type::Long | Type::Float | Type::Double | Type::Precise
        )
    }

    /// Position in the numeric widening chain `int → long → float → double → precise`.
    pub fn numeric_rank(&self) -> Option<u8> {
        match self {
            Type::Int => Some(0),
            Type::Long => Some(1),
            Type::Float => Some(2),
            Type::Double => Some(3),
            Type::Precise => Some(4),
            _ => None,
        }
    }

    /// True if a value of this type can be widened to `other` without an
    /// explicit cast.
    pub fn promotes_to(&self, other: &Type) -> bool {
        if self == other || *self == Type::Null {
            return true;
        }
        match (self.numeric_rank(), other.numeric_rank()) {
            (Some(a), Some(b)) => a <= b,
            _ => false,
        }
    }

    /// The narrowest type both operands promote to, if any.
    pub fn common(&self, other: &Type) -> Option<Type> {
        if self.promotes_to(other) {
            Some(*other)
        } else if other.promotes_to(self) {
            Some(*self)
        } else {
            None
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::Int => "INT",
            Type::Long => "BIGINT",
            Type::Float => "FLOAT",
            Type::Double => "DOUBLE",
            Type::Precise => "PRECISE",
            Type::Str => "STRING",
            Type::Bool => "BOOLEAN",
            Type::Binary => "BINARY",
            Type::Timestamp => "TIMESTAMP",
            Type::Null => "NULL",
        };
        f.write_str(name)
    }
}

/// A named, typed field of a stream schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: Type,
    pub nullable: bool,
}

impl FieldDescriptor {
    /// A nullable field.
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
        }
    }

    /// A field declared `NOT NULL`.
    pub fn not_null(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
        }
    }
}

impl fmt::Display for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.ty)?;
        if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        Ok(())
    }
}

/// Ordered list of fields with name lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<FieldDescriptor>", into = "Vec<FieldDescriptor>")]
pub struct Schema {
    fields: Vec<FieldDescriptor>,
    index: FxHashMap<String, usize>,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for Schema {}

/// A schema shared between every record that uses it.
pub type SchemaRef = Arc<Schema>;

impl Schema {
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        let mut index = FxHashMap::default();
        for (i, field) in fields.iter().enumerate() {
            index.entry(field.name.clone()).or_insert(i);
        }
        Self { fields, index }
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, idx: usize) -> Option<&FieldDescriptor> {
        self.fields.get(idx)
    }

    /// Position of the first field called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn field_named(&self, name: &str) -> Option<&FieldDescriptor> {
        self.index_of(name).and_then(|i| self.fields.get(i))
    }

    /// The same schema with repeated field names removed (first one wins).
    pub fn distinct(&self) -> Schema {
        let mut seen = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            if !seen.iter().any(|f: &FieldDescriptor| f.name == field.name) {
                seen.push(field.clone());
            }
        }
        Schema::new(seen)
    }

    /// Stable 64-bit fingerprint of names, types and nullability (FNV-1a).
    pub fn fingerprint(&self) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;
        let mut hash = OFFSET;
        for field in &self.fields {
            for byte in field.to_string().bytes().chain(std::iter::once(b';')) {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(PRIME);
            }
        }
        hash
    }
}

impl From<Vec<FieldDescriptor>> for Schema {
    fn from(fields: Vec<FieldDescriptor>) -> Self {
        Schema::new(fields)
    }
}

impl From<Schema> for Vec<FieldDescriptor> {
    fn from(schema: Schema) -> Self {
        schema.fields
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", field)?;
        }
        write!(f, ")")
    }
}
