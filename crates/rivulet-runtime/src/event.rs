//! Events and records flowing through a flow
//!
//! An [`Event`] is the immutable unit of ingestion: a timestamp plus an
//! encoded payload. A [`Record`] wraps a shared event together with the
//! layout needed to read it, and decodes fields lazily the first time they
//! are asked for.

use crate::parser::EventParser;
use bytes::Bytes;
use rivulet_core::{EvalError, FieldSource, SchemaRef, Value};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// A shared reference to an Event, so fan-out never deep-copies payloads.
pub type SharedEvent = Arc<Event>;

/// A timestamped, encoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Event time in milliseconds since the epoch
    timestamp: i64,
    payload: Bytes,
}

impl Event {
    pub fn new(timestamp: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            timestamp,
            payload: payload.into(),
        }
    }

    /// An event with a UTF-8 text payload.
    pub fn from_text(timestamp: i64, text: &str) -> Self {
        Self::new(timestamp, Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// Record layout: the schema, and the parser that decodes the payload
/// (absent for materialized records).
#[derive(Debug, Clone)]
pub struct Layout {
    pub schema: SchemaRef,
    pub parser: Option<Arc<dyn EventParser>>,
}

/// The unit passed between nodes.
#[derive(Clone)]
pub struct Record {
    event: SharedEvent,
    layout: Arc<Layout>,
    cache: Box<[OnceLock<Value>]>,
}

impl Record {
    /// A record whose fields are decoded from the event payload on demand.
    pub fn parsed(event: SharedEvent, layout: Arc<Layout>) -> Self {
        let cache = (0..layout.schema.len()).map(|_| OnceLock::new()).collect();
        Self {
            event,
            layout,
            cache,
        }
    }

    /// A derived record with every field already known.
    pub fn materialized(timestamp: i64, schema: SchemaRef, values: Vec<Value>) -> Self {
        let cache = values.into_iter().map(OnceLock::from).collect();
        Self {
            event: Arc::new(Event::new(timestamp, Bytes::new())),
            layout: Arc::new(Layout {
                schema,
                parser: None,
            }),
            cache,
        }
    }

    pub fn timestamp(&self) -> i64 {
        self.event.timestamp()
    }

    pub fn event(&self) -> &SharedEvent {
        &self.event
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.layout.schema
    }

    /// Value of the field at `index`, decoding it on first access.
    ///
    /// Decode failures are logged and read as `NULL`. Out-of-range indexes
    /// read as `NULL` too.
    pub fn value(&self, index: usize) -> &Value {
        static NULL: Value = Value::Null;
        let Some(cell) = self.cache.get(index) else {
            return &NULL;
        };
        cell.get_or_init(|| self.decode(index))
    }

    fn decode(&self, index: usize) -> Value {
        let (Some(parser), Some(field)) = (&self.layout.parser, self.layout.schema.field(index))
        else {
            return Value::Null;
        };
        match parser.parse_field(self.event.payload(), index, field) {
            Ok(v) => v,
            Err(e) => {
                debug!("Reading field '{}' as null: {}", field.name, e);
                Value::Null
            }
        }
    }

    /// Value of the field called `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.layout.schema.index_of(name).map(|i| self.value(i))
    }

    /// Every field value, in schema order.
    pub fn values(&self) -> Vec<Value> {
        (0..self.cache.len()).map(|i| self.value(i).clone()).collect()
    }
}

impl FieldSource for Record {
    fn field(&self, name: &str) -> Result<Value, EvalError> {
        self.get(name)
            .cloned()
            .ok_or_else(|| EvalError::UnknownField(name.to_string()))
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("timestamp", &self.timestamp())
            .field("schema", &self.layout.schema.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::DelimitedParser;
    use rivulet_core::{FieldDescriptor, Schema, Type};

    fn ab_layout() -> Arc<Layout> {
        Arc::new(Layout {
            schema: Arc::new(Schema::new(vec![
                FieldDescriptor::new("a", Type::Int),
                FieldDescriptor::new("b", Type::Int),
            ])),
            parser: Some(Arc::new(DelimitedParser::new(','))),
        })
    }

    #[test]
    fn test_parsed_record_reads_fields() {
        let record = Record::parsed(Arc::new(Event::from_text(35, "0,10")), ab_layout());
        assert_eq!(record.timestamp(), 35);
        assert_eq!(record.get("a"), Some(&Value::Int(0)));
        assert_eq!(record.get("b"), Some(&Value::Int(10)));
        assert_eq!(record.get("zz"), None);
    }

    #[test]
    fn test_empty_field_is_null() {
        let record = Record::parsed(Arc::new(Event::from_text(36, "1,")), ab_layout());
        assert_eq!(record.value(1), &Value::Null);
    }

    #[test]
    fn test_bad_field_reads_as_null() {
        let record = Record::parsed(Arc::new(Event::from_text(36, "x,4")), ab_layout());
        assert_eq!(record.value(0), &Value::Null);
        assert_eq!(record.value(1), &Value::Int(4));
    }

    #[test]
    fn test_materialized_record() {
        let schema = Arc::new(Schema::new(vec![FieldDescriptor::new("c", Type::Long)]));
        let record = Record::materialized(200, schema, vec![Value::Long(3)]);
        assert_eq!(record.values(), vec![Value::Long(3)]);
        assert_eq!(record.field("c"), Ok(Value::Long(3)));
        assert!(record.field("d").is_err());
        assert_eq!(record.value(7), &Value::Null);
    }

    #[test]
    fn test_clones_share_event() {
        let record = Record::parsed(Arc::new(Event::from_text(1, "1,2")), ab_layout());
        let copy = record.clone();
        assert!(Arc::ptr_eq(record.event(), copy.event()));
    }
}
