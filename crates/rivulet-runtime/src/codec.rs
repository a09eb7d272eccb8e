//! Sink record codec.
//!
//! Records handed to external sinks are MessagePack envelopes tagged with the
//! fingerprint of the schema they were written with. Readers refuse
//! envelopes whose tag does not match the schema they expect.

use crate::error::FlowError;
use bytes::Bytes;
use rivulet_core::{promote, Schema, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    schema: u64,
    timestamp: i64,
    values: Vec<Value>,
}

/// A record decoded from a sink envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub timestamp: i64,
    pub values: Vec<Value>,
}

/// Encode `values` against `schema`.
///
/// Each value is widened to its field's declared type. A `NULL` in a field
/// declared `NOT NULL`, an arity mismatch, or a value that cannot be widened
/// to the field type is an [`FlowError::Encoding`] error.
pub fn encode(schema: &Schema, timestamp: i64, values: &[Value]) -> Result<Bytes, FlowError> {
    if values.len() != schema.len() {
        return Err(FlowError::Encoding {
            field: "<record>".to_string(),
            reason: format!("expected {} values, got {}", schema.len(), values.len()),
        });
    }

    let mut encoded = Vec::with_capacity(values.len());
    for (field, value) in schema.fields().iter().zip(values) {
        if value.is_null() {
            if !field.nullable {
                return Err(FlowError::Encoding {
                    field: field.name.clone(),
                    reason: "null value in non-null field".to_string(),
                });
            }
            encoded.push(Value::Null);
            continue;
        }
        let widened = promote(value, field.ty).map_err(|e| FlowError::Encoding {
            field: field.name.clone(),
            reason: e.to_string(),
        })?;
        encoded.push(widened);
    }

    let envelope = Envelope {
        schema: schema.fingerprint(),
        timestamp,
        values: encoded,
    };
    rmp_serde::to_vec(&envelope)
        .map(Bytes::from)
        .map_err(|e| FlowError::Encoding {
            field: "<record>".to_string(),
            reason: e.to_string(),
        })
}

/// Decode an envelope written with `schema`.
pub fn decode(schema: &Schema, data: &[u8]) -> Result<DecodedRecord, FlowError> {
    if data.is_empty() {
        return Err(parse_error("empty sink record"));
    }
    let envelope: Envelope = rmp_serde::from_slice(data).map_err(|e| parse_error(e.to_string()))?;
    if envelope.schema != schema.fingerprint() {
        return Err(parse_error(format!(
            "schema tag {:016x} does not match {:016x}",
            envelope.schema,
            schema.fingerprint()
        )));
    }
    if envelope.values.len() != schema.len() {
        return Err(parse_error(format!(
            "expected {} values, got {}",
            schema.len(),
            envelope.values.len()
        )));
    }
    Ok(DecodedRecord {
        timestamp: envelope.timestamp,
        values: envelope.values,
    })
}

fn parse_error(reason: impl Into<String>) -> FlowError {
    FlowError::Parse {
        field: "<record>".to_string(),
        reason: reason.into(),
    }
}
