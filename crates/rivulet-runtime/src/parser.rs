//! Event payload parsers
//!
//! A parser decodes one field of an event payload at a time, so records only
//! pay for the fields a query actually reads.

use crate::codec;
use crate::error::FlowError;
use bytes::Bytes;
use rivulet_core::{FieldDescriptor, Schema, SchemaRef, Type, Value};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Decodes fields out of an event payload.
pub trait EventParser: Send + Sync + fmt::Debug {
    /// Short name of the payload format.
    fn name(&self) -> &str;

    /// Decode the field at `index`, described by `field`.
    fn parse_field(
        &self,
        payload: &Bytes,
        index: usize,
        field: &FieldDescriptor,
    ) -> Result<Value, FlowError>;
}

/// Text records with a single-character field delimiter. Empty fields and
/// missing trailing fields are `NULL`.
#[derive(Debug, Clone)]
pub struct DelimitedParser {
    delimiter: char,
}

impl DelimitedParser {
    pub fn new(delimiter: char) -> Self {
        Self { delimiter }
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }
}

impl Default for DelimitedParser {
    fn default() -> Self {
        Self::new(',')
    }
}

impl EventParser for DelimitedParser {
    fn name(&self) -> &str {
        "delimited"
    }

    fn parse_field(
        &self,
        payload: &Bytes,
        index: usize,
        field: &FieldDescriptor,
    ) -> Result<Value, FlowError> {
        let text = std::str::from_utf8(payload).map_err(|e| FlowError::Parse {
            field: field.name.clone(),
            reason: e.to_string(),
        })?;
        match text.split(self.delimiter).nth(index) {
            Some(raw) => parse_text(raw, field),
            None => Ok(Value::Null),
        }
    }
}

/// Parse one textual field according to its declared type.
pub fn parse_text(raw: &str, field: &FieldDescriptor) -> Result<Value, FlowError> {
    if raw.is_empty() {
        return Ok(Value::Null);
    }
    let bad = |reason: String| FlowError::Parse {
        field: field.name.clone(),
        reason,
    };
    let value = match field.ty {
        Type::Int => Value::Int(raw.parse().map_err(|e| bad(format!("{e}")))?),
        Type::Long => Value::Long(raw.parse().map_err(|e| bad(format!("{e}")))?),
        Type::Float => Value::Float(raw.parse().map_err(|e| bad(format!("{e}")))?),
        Type::Double => Value::Double(raw.parse().map_err(|e| bad(format!("{e}")))?),
        Type::Precise => Value::Precise(Decimal::from_str(raw).map_err(|e| bad(e.to_string()))?),
        Type::Timestamp => Value::Timestamp(raw.parse().map_err(|e| bad(format!("{e}")))?),
        Type::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err(bad(format!("'{raw}' is not a boolean"))),
        },
        Type::Str => Value::Str(raw.to_string()),
        Type::Binary => Value::Binary(Bytes::copy_from_slice(raw.as_bytes())),
        Type::Null => Value::Null,
    };
    Ok(value)
}

/// Reads envelopes written by the sink codec for a fixed schema.
#[derive(Debug, Clone)]
pub struct BinaryParser {
    schema: SchemaRef,
}

impl BinaryParser {
    pub fn new(schema: SchemaRef) -> Self {
        Self { schema }
    }
}

impl EventParser for BinaryParser {
    fn name(&self) -> &str {
        "binary"
    }

    fn parse_field(
        &self,
        payload: &Bytes,
        index: usize,
        _field: &FieldDescriptor,
    ) -> Result<Value, FlowError> {
        let mut record = codec::decode(&self.schema, payload)?;
        Ok(record.values.get_mut(index).map(std::mem::take).unwrap_or_default())
    }
}

/// Names a payload format and its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSpec {
    pub format: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl FormatSpec {
    pub const DELIMITED: &'static str = "delimited";
    pub const BINARY: &'static str = "binary";
    pub const DELIMITER_PARAM: &'static str = "delimiter";
    pub const SCHEMA_PARAM: &'static str = "schema";

    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn delimited(delimiter: char) -> Self {
        Self::new(Self::DELIMITED).with_param(Self::DELIMITER_PARAM, delimiter.to_string())
    }

    /// Binary sink envelopes written with `schema`.
    pub fn binary(schema: &Schema) -> Self {
        Self::new(Self::BINARY)
            .with_param(Self::SCHEMA_PARAM, format!("{:016x}", schema.fingerprint()))
    }

    /// Build the parser this spec describes for records of `schema`.
    pub fn build_parser(&self, schema: &SchemaRef) -> Result<Arc<dyn EventParser>, FlowError> {
        match self.format.as_str() {
            Self::DELIMITED => {
                let delimiter = match self.param(Self::DELIMITER_PARAM) {
                    None => ',',
                    Some(d) => {
                        let mut chars = d.chars();
                        match (chars.next(), chars.next()) {
                            (Some(c), None) => c,
                            _ => {
                                return Err(FlowError::Parse {
                                    field: Self::DELIMITER_PARAM.to_string(),
                                    reason: format!("'{d}' is not a single character"),
                                })
                            }
                        }
                    }
                };
                Ok(Arc::new(DelimitedParser::new(delimiter)))
            }
            Self::BINARY => {
                let expected = format!("{:016x}", schema.fingerprint());
                if let Some(tag) = self.param(Self::SCHEMA_PARAM) {
                    if tag != expected {
                        return Err(FlowError::Parse {
                            field: Self::SCHEMA_PARAM.to_string(),
                            reason: format!("schema tag {tag} does not match {expected}"),
                        });
                    }
                }
                Ok(Arc::new(BinaryParser::new(Arc::clone(schema))))
            }
            other => Err(FlowError::Parse {
                field: "format".to_string(),
                reason: format!("unknown event format '{other}'"),
            }),
        }
    }
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self::delimited(',')
    }
}
