use pantry_core::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered entity records with unique `id`s.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Collection {
    records: Vec<Record>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from records, keeping the first occurrence of each id and
    /// dropping records without a string `id`.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut collection = Self::new();
        for record in records {
            let Some(id) = record_id(&record).map(str::to_owned) else {
                tracing::debug!("dropping cached record without an id");
                continue;
            };
            let _ = collection.insert_if_absent(&id, record);
        }
        collection
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|r| record_id(r) == Some(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Append unless the id is already present. Returns whether it was inserted.
    pub fn insert_if_absent(&mut self, id: &str, record: Record) -> bool {
        if self.contains(id) {
            return false;
        }
        self.records.push(with_id(record, id));
        true
    }

    /// Like [`insert_if_absent`](Self::insert_if_absent) but places the record first.
    pub fn prepend_if_absent(&mut self, id: &str, record: Record) -> bool {
        if self.contains(id) {
            return false;
        }
        self.records.insert(0, with_id(record, id));
        true
    }

    /// Shallow-merge `patch` into the record with `id`. Fields absent from the
    /// patch are kept; the `id` field is never overwritten.
    pub fn merge(&mut self, id: &str, patch: &Record) -> bool {
        let Some(record) = self.records.iter_mut().find(|r| record_id(r) == Some(id)) else {
            return false;
        };
        for (field, value) in patch {
            if field == "id" {
                continue;
            }
            let _ = record.insert(field.clone(), value.clone());
        }
        true
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|r| record_id(r) != Some(id));
        self.records.len() != before
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.records.iter().filter_map(record_id).collect()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }
}

fn record_id(record: &Record) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

fn with_id(mut record: Record, id: &str) -> Record {
    let _ = record.insert("id".into(), Value::String(id.to_owned()));
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn insert_is_idempotent() {
        let mut c = Collection::new();
        assert!(c.insert_if_absent("I1", rec(json!({"name": "Milk"}))));
        assert!(!c.insert_if_absent("I1", rec(json!({"name": "Eggs"}))));
        assert_eq!(c.len(), 1);
        assert_eq!(c.get("I1").unwrap()["name"], "Milk");
    }

    #[test]
    fn merge_preserves_unlisted_fields() {
        let mut c = Collection::new();
        c.insert_if_absent("I1", rec(json!({"name": "Milk"})));
        assert!(c.merge("I1", &rec(json!({"quantity": 5}))));
        assert_eq!(
            Value::Object(c.get("I1").unwrap().clone()),
            json!({"id": "I1", "name": "Milk", "quantity": 5})
        );
    }

    #[test]
    fn merge_never_rewrites_id() {
        let mut c = Collection::new();
        c.insert_if_absent("I1", Record::new());
        c.merge("I1", &rec(json!({"id": "I2"})));
        assert!(c.contains("I1"));
        assert!(!c.contains("I2"));
    }

    #[test]
    fn merge_missing_id_is_noop() {
        let mut c = Collection::new();
        assert!(!c.merge("ghost", &rec(json!({"quantity": 1}))));
        assert!(c.is_empty());
    }

    #[test]
    fn remove_missing_id_is_noop() {
        let mut c = Collection::from_records([rec(json!({"id": "I1"}))]);
        assert!(!c.remove("ghost"));
        assert_eq!(c.ids(), vec!["I1"]);
        assert!(c.remove("I1"));
        assert!(c.is_empty());
    }

    #[test]
    fn prepend_places_first() {
        let mut c = Collection::from_records([rec(json!({"id": "N1"}))]);
        c.prepend_if_absent("N2", Record::new());
        assert_eq!(c.ids(), vec!["N2", "N1"]);
    }

    #[test]
    fn from_records_dedupes_and_drops_idless() {
        let c = Collection::from_records([
            rec(json!({"id": "I1", "name": "first"})),
            rec(json!({"name": "no id"})),
            rec(json!({"id": "I1", "name": "second"})),
        ]);
        assert_eq!(c.len(), 1);
        assert_eq!(c.get("I1").unwrap()["name"], "first");
    }

    #[test]
    fn serializes_as_array() {
        let c = Collection::from_records([rec(json!({"id": "I1"}))]);
        assert_eq!(serde_json::to_value(&c).unwrap(), json!([{"id": "I1"}]));
    }
}
