//! Measurement records and the table they are aggregated into.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HarnessError;

/// Ordered named fields measured for one source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing an earlier value in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn into_values(self) -> Vec<Value> {
        self.fields.into_iter().map(|(_, v)| v).collect()
    }
}

/// Column-named rows, one per measured source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl RecordTable {
    /// Table whose columns are the keys of the first record.
    ///
    /// Every record must carry the same keys in the same order.
    pub fn from_records(
        set_id: &str,
        records: Vec<Record>,
    ) -> Result<Self, HarnessError> {
        let columns: Vec<String> = match records.first() {
            Some(first) => first.keys().map(str::to_string).collect(),
            None => return Err(HarnessError::NoRecords(set_id.to_string())),
        };

        let mut rows = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            if !record.keys().eq(columns.iter().map(String::as_str)) {
                return Err(HarnessError::ColumnMismatch {
                    index,
                    expected: columns,
                    found: record.keys().map(str::to_string).collect(),
                });
            }
            rows.push(record.into_values());
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&[Value]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    /// Every value of column `name`.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| &row[index]).collect())
    }

    pub fn save(&self, path: &Path) -> Result<(), HarnessError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| HarnessError::io(parent, e))?;
        }
        let json = serde_json::to_string(self).map_err(|e| HarnessError::json(path, e))?;
        std::fs::write(path, json).map_err(|e| HarnessError::io(path, e))
    }

    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let json = std::fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
        serde_json::from_str(&json).map_err(|e| HarnessError::json(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, flux: f64) -> Record {
        Record::new()
            .with("blend_id", id)
            .with("flux", flux)
            .with("is_edge", false)
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut r = record("a", 1.0);
        r.insert("blend_id", "b");
        assert_eq!(r.keys().collect::<Vec<_>>(), ["blend_id", "flux", "is_edge"]);
        assert_eq!(r.get("blend_id"), Some(&json!("b")));
    }

    #[test]
    fn test_table_columns_from_first_record() {
        let table =
            RecordTable::from_records("1", vec![record("a", 1.0), record("b", 2.5)]).unwrap();
        assert_eq!(table.columns(), ["blend_id", "flux", "is_edge"]);
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.column("flux").unwrap(),
            vec![&json!(1.0), &json!(2.5)]
        );
        assert!(table.column("missing").is_none());
    }

    #[test]
    fn test_mismatched_keys_rejected() {
        let odd = Record::new().with("blend_id", "c").with("flux", 3.0);
        let err = RecordTable::from_records("1", vec![record("a", 1.0), odd]).unwrap_err();
        assert!(matches!(err, HarnessError::ColumnMismatch { index: 1, .. }));

        assert!(matches!(
            RecordTable::from_records("1", Vec::new()),
            Err(HarnessError::NoRecords(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1").join("main.json");
        let table = RecordTable::from_records("1", vec![record("a", 1.0)]).unwrap();
        table.save(&path).unwrap();
        assert_eq!(RecordTable::load(&path).unwrap(), table);
    }

    #[test]
    fn test_saved_floats_keep_full_precision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("precision.json");
        let fluxes = [1472.8181225173141, 0.1 + 0.2, 6.02214076e23, -7.5e-300];
        let records = fluxes
            .iter()
            .map(|&f| record("a", f))
            .collect::<Vec<_>>();
        let table = RecordTable::from_records("1", records).unwrap();
        table.save(&path).unwrap();

        let loaded = RecordTable::load(&path).unwrap();
        let stored: Vec<f64> = loaded
            .column("flux")
            .unwrap()
            .iter()
            .map(|v| v.as_f64().unwrap())
            .collect();
        for (stored, expected) in stored.iter().zip(fluxes) {
            assert_eq!(stored.to_bits(), expected.to_bits());
        }
        assert_eq!(loaded, table);
    }
}
