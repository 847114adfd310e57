//! Primitive key/value payload carried by scheduler jobs.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, DatabaseError};

/// Maximum serialized size of a single payload, in bytes.
pub const MAX_DATA_BYTES: usize = 10 * 1024;

/// One primitive entry in a job payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataValue {
    String(String),
    Long(i64),
    Double(f64),
    Bool(bool),
    StringArray(Vec<String>),
    LongArray(Vec<i64>),
    DoubleArray(Vec<f64>),
    BoolArray(Vec<bool>),
}

/// Job input, progress or output payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkData(IndexMap<String, DataValue>);

impl WorkData {
    pub fn builder() -> WorkDataBuilder {
        WorkDataBuilder::default()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.0.get(key)
    }

    /// Read a `Long` entry.
    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(DataValue::Long(v)) => Some(*v),
            _ => None,
        }
    }

    /// Read a `String` entry.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(DataValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DataValue)> {
        self.0.iter()
    }

    /// Serialize for a storage column.
    pub fn to_json(&self) -> Result<String, DatabaseError> {
        serde_json::to_string(self).map_err(|e| DatabaseError::Serialization(e.to_string()))
    }

    /// Parse a storage column. Empty or NULL columns yield an empty payload.
    pub fn from_json(raw: Option<&str>) -> Result<Self, DatabaseError> {
        match raw {
            None => Ok(Self::empty()),
            Some(s) if s.trim().is_empty() => Ok(Self::empty()),
            Some(s) => {
                serde_json::from_str(s).map_err(|e| DatabaseError::Serialization(e.to_string()))
            }
        }
    }
}

/// Accumulates entries, then enforces the payload size limit on `build`.
#[derive(Debug, Default)]
pub struct WorkDataBuilder {
    entries: IndexMap<String, DataValue>,
}

impl WorkDataBuilder {
    pub fn put(&mut self, key: impl Into<String>, value: DataValue) -> &mut Self {
        self.entries.insert(key.into(), value);
        self
    }

    pub fn put_long(&mut self, key: impl Into<String>, value: i64) -> &mut Self {
        self.put(key, DataValue::Long(value))
    }

    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.put(key, DataValue::String(value.into()))
    }

    /// Copy every entry of an existing payload.
    pub fn put_all(&mut self, data: &WorkData) -> &mut Self {
        for (k, v) in data.iter() {
            self.entries.insert(k.clone(), v.clone());
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fails on oversized payloads and on NaN or infinite doubles, which
    /// the storage column cannot represent.
    pub fn build(self) -> Result<WorkData, CodecError> {
        if let Some(field) = self.entries.iter().find_map(|(k, v)| {
            let finite = match v {
                DataValue::Double(d) => d.is_finite(),
                DataValue::DoubleArray(ds) => ds.iter().all(|d| d.is_finite()),
                _ => true,
            };
            (!finite).then(|| k.clone())
        }) {
            return Err(CodecError::NonFinite { field });
        }

        let data = WorkData(self.entries);
        let size = serde_json::to_vec(&data).map(|b| b.len()).unwrap_or(0);
        if size > MAX_DATA_BYTES {
            return Err(CodecError::PayloadTooLarge {
                size,
                max: MAX_DATA_BYTES,
            });
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_and_getters() {
        let mut b = WorkData::builder();
        b.put_long("callbackHandle", 7).put_string("name", "sync");
        let data = b.build().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data.get_long("callbackHandle"), Some(7));
        assert_eq!(data.get_string("name"), Some("sync"));
        assert_eq!(data.get_long("name"), None);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut b = WorkData::builder();
        b.put_string("blob", "x".repeat(MAX_DATA_BYTES + 1));
        assert!(matches!(
            b.build(),
            Err(CodecError::PayloadTooLarge { max: MAX_DATA_BYTES, .. })
        ));
    }

    #[test]
    fn non_finite_doubles_are_rejected() {
        let mut b = WorkData::builder();
        b.put("x", DataValue::Double(f64::NAN));
        assert!(matches!(b.build(), Err(CodecError::NonFinite { field }) if field == "x"));

        let mut b = WorkData::builder();
        b.put("xs", DataValue::DoubleArray(vec![1.0, f64::INFINITY]));
        assert!(matches!(b.build(), Err(CodecError::NonFinite { field }) if field == "xs"));

        let mut b = WorkData::builder();
        b.put("x", DataValue::Double(f64::MAX));
        assert!(b.build().is_ok());
    }

    #[test]
    fn storage_column_keeps_array_types() {
        let mut b = WorkData::builder();
        b.put("d", DataValue::DoubleArray(vec![1.0, 2.0]));
        b.put("l", DataValue::LongArray(vec![1, 2]));
        let data = b.build().unwrap();

        let json = data.to_json().unwrap();
        let parsed = WorkData::from_json(Some(&json)).unwrap();
        assert_eq!(parsed, data);
        assert!(WorkData::from_json(None).unwrap().is_empty());
        assert!(WorkData::from_json(Some("")).unwrap().is_empty());
    }
}
