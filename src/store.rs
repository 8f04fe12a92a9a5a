use crate::prelude::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// A single time-stamped, tagged set of measurement fields.
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: Vec<(String, String)>,
    pub fields: HashMap<String, FieldValue>,
    pub time: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Text(String),
}

impl Point {
    pub fn new(measurement: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: HashMap::new(),
            time,
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    pub fn float_field(mut self, key: impl Into<String>, value: f64) -> Self {
        self.fields.insert(key.into(), FieldValue::Float(value));
        self
    }

    pub fn text_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), FieldValue::Text(value.into()));
        self
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        match self.fields.get(key) {
            Some(FieldValue::Float(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(tag, _)| tag == key)
            .map(|(_, value)| value.as_str())
    }
}

/// One result row of a query, keyed by column name.
pub type Row = HashMap<String, serde_json::Value>;

/// The time-series backend as the pipeline sees it: point writes for the
/// ingest path, queries for the read-side endpoints only.
#[async_trait]
pub trait Store: Send + Sync {
    async fn write(&self, point: Point) -> Result<()>;
    async fn query(&self, query: &str) -> Result<Vec<Row>>;
}
