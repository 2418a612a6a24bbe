//! Outcome records written by workers into the result store.
//!
//! The stored shape is a JSON object carrying exactly one of two keys:
//!
//! ```text
//! { "result": <value> }   // the job succeeded
//! { "err": <value> }      // the job failed
//! ```
//!
//! A stored value carrying neither key is not an outcome at all and reads
//! back as "no outcome".

use serde_json::{Map, Value as JsonValue};

const RESULT_KEY: &str = "result";
const ERR_KEY: &str = "err";

/// What a worker recorded for a finished job.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(JsonValue),
    Failure(JsonValue),
}

impl Outcome {
    pub fn success(value: impl Into<JsonValue>) -> Self {
        Self::Success(value.into())
    }

    pub fn failure(value: impl Into<JsonValue>) -> Self {
        Self::Failure(value.into())
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    /// Interpret a stored record.
    ///
    /// A non-null `err` wins over `result`; a record with neither key yields
    /// `None`.
    pub fn from_raw(raw: &JsonValue) -> Option<Self> {
        let fields = raw.as_object()?;
        match fields.get(ERR_KEY) {
            Some(err) if !err.is_null() => return Some(Self::Failure(err.clone())),
            _ => {}
        }
        fields.get(RESULT_KEY).map(|v| Self::Success(v.clone()))
    }

    /// Parse a stored JSON document.
    pub fn from_json(raw: &str) -> Result<Option<Self>, serde_json::Error> {
        let value: JsonValue = serde_json::from_str(raw)?;
        Ok(Self::from_raw(&value))
    }

    /// The stored form of this outcome.
    pub fn to_raw(&self) -> JsonValue {
        let mut fields = Map::with_capacity(1);
        match self {
            Outcome::Success(v) => fields.insert(RESULT_KEY.to_string(), v.clone()),
            Outcome::Failure(v) => fields.insert(ERR_KEY.to_string(), v.clone()),
        };
        JsonValue::Object(fields)
    }
}
