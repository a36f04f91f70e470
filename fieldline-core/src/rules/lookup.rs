//! Reference-table lookups for `lookup` rules and referential checks.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// An external reference table keyed by string.
pub trait LookupSource: Send + Sync {
    fn lookup(&self, key: &str) -> Option<Value>;

    fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }
}

/// A reference table held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLookup {
    entries: HashMap<String, Value>,
}

impl InMemoryLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for InMemoryLookup {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl LookupSource for InMemoryLookup {
    fn lookup(&self, key: &str) -> Option<Value> {
        self.entries.get(key).cloned()
    }
}

/// Named lookup tables available to a run.
#[derive(Clone, Default)]
pub struct LookupRegistry {
    tables: HashMap<String, Arc<dyn LookupSource>>,
}

impl std::fmt::Debug for LookupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.tables.keys().collect();
        names.sort();
        f.debug_struct("LookupRegistry")
            .field("tables", &names)
            .finish()
    }
}

impl LookupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the inline tables declared in configuration.
    pub fn from_tables(tables: &BTreeMap<String, BTreeMap<String, Value>>) -> Self {
        let mut registry = Self::new();
        for (name, entries) in tables {
            let table: InMemoryLookup = entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            registry.register(name.clone(), Arc::new(table));
        }
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, source: Arc<dyn LookupSource>) {
        self.tables.insert(name.into(), source);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LookupSource>> {
        self.tables.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_in_memory_lookup() {
        let table: InMemoryLookup = [("DE", json!("Germany")), ("FR", json!("France"))]
            .into_iter()
            .collect();
        assert_eq!(table.lookup("DE"), Some(json!("Germany")));
        assert_eq!(table.lookup("XX"), None);
        assert!(table.contains("FR"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_registry_from_config_tables() {
        let mut tables = BTreeMap::new();
        tables.insert(
            "countries".to_string(),
            BTreeMap::from([("DE".to_string(), json!("Germany"))]),
        );
        let registry = LookupRegistry::from_tables(&tables);
        assert!(registry.contains("countries"));
        let countries = registry.get("countries").unwrap();
        assert_eq!(countries.lookup("DE"), Some(json!("Germany")));
        assert!(registry.get("currencies").is_none());
    }
}
