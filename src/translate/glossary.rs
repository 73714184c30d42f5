//! Per-novel name dictionary.
//! A `NameDictionary` is a request-scoped cache over the store: build one (or
//! `load` it again) at the start of each pipeline pass, never share it across
//! concurrent requests. The store stays the single source of truth.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::apply::apply_dictionary;
use crate::model::{NameMapping, NameType};
use crate::store::{Store, StoreError};

pub struct NameDictionary {
    store: Arc<Store>,
    novel_id: Option<String>,
    names: HashMap<String, String>,
}

impl NameDictionary {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            novel_id: None,
            names: HashMap::new(),
        }
    }

    /// Construct and load in one step.
    pub fn for_novel(store: Arc<Store>, novel_id: &str) -> Result<Self, StoreError> {
        let mut dictionary = Self::new(store);
        dictionary.load(novel_id)?;
        Ok(dictionary)
    }

    /// Replace the cached mapping with the novel's current dictionary.
    pub fn load(&mut self, novel_id: &str) -> Result<&HashMap<String, String>, StoreError> {
        let entries = self.store.name_mappings(novel_id)?;
        self.names = entries
            .into_iter()
            .map(|e| (e.original_name, e.translated_name))
            .collect();
        self.novel_id = Some(novel_id.to_string());
        debug!(novel_id, entries = self.names.len(), "name dictionary loaded");
        Ok(&self.names)
    }

    /// Exact-match lookup.
    pub fn lookup(&self, original_name: &str) -> Option<&str> {
        self.names.get(original_name).map(String::as_str)
    }

    pub fn contains(&self, original_name: &str) -> bool {
        self.names.contains_key(original_name)
    }

    /// Persist a new entry, then reflect it in the cache. Fails with
    /// `StoreError::Conflict` when the novel already has `original_name`;
    /// the cache is untouched in that case.
    pub fn insert(
        &mut self,
        novel_id: &str,
        original_name: &str,
        translated_name: &str,
        name_type: NameType,
    ) -> Result<NameMapping, StoreError> {
        let mapping =
            self.store
                .insert_name_mapping(novel_id, original_name, translated_name, name_type, None)?;
        if self.novel_id.as_deref() == Some(novel_id) {
            self.names
                .insert(mapping.original_name.clone(), mapping.translated_name.clone());
        }
        Ok(mapping)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Rewrite `text` so every known original name uses its canonical
    /// translation.
    pub fn apply(&self, text: &str) -> String {
        apply_dictionary(
            text,
            self.names.iter().map(|(o, t)| (o.as_str(), t.as_str())),
        )
    }
}
