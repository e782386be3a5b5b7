//! Lookup of global dictionaries by id.
//!
//! Records only carry the id of the global dictionary they were encoded with, so decoding one
//! needs something that maps ids back to dictionaries. Encoding needs to pick a dictionary for a
//! feature type in the first place.

use std::collections::HashMap;

use crate::dictionary::SharedDictionary;
use crate::error::{Error, Result};

pub trait DictionaryManager {
    /// Register a dictionary under its id, replacing any previous one.
    fn put_dictionary(&mut self, dict: SharedDictionary) -> Result<()>;

    /// Remove a dictionary. Returns whether it was registered.
    fn delete_dictionary(&mut self, id: &str) -> bool;

    fn get_dictionary(&self, id: &str) -> Option<SharedDictionary>;

    /// The dictionary new records of the given feature type should be encoded with.
    fn get_encoding_dictionary(
        &self,
        feature_type: Option<&str>,
        context: Option<&str>,
    ) -> Option<SharedDictionary>;
}

/// Keeps dictionaries in a map. Encoding dictionaries are chosen by context and feature type,
/// falling back to broader matches.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDictionaryManager {
    dictionaries: HashMap<String, SharedDictionary>,
    encoding: HashMap<(Option<String>, Option<String>), String>,
}

impl InMemoryDictionaryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `id` the encoding dictionary for records of `feature_type` in `context`. `None`
    /// matches any feature type or context.
    pub fn set_encoding_dictionary(
        &mut self,
        feature_type: Option<&str>,
        context: Option<&str>,
        id: &str,
    ) {
        self.encoding.insert(
            (context.map(String::from), feature_type.map(String::from)),
            id.to_string(),
        );
    }

    pub fn len(&self) -> usize {
        self.dictionaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dictionaries.is_empty()
    }
}

impl DictionaryManager for InMemoryDictionaryManager {
    fn put_dictionary(&mut self, dict: SharedDictionary) -> Result<()> {
        let id = dict
            .id()
            .ok_or_else(|| Error::BadEncode("Can't register a dictionary without id".to_string()))?
            .to_string();
        tracing::debug!(id = id.as_str(), len = dict.len(), "registered dictionary");
        self.dictionaries.insert(id, dict);
        Ok(())
    }

    fn delete_dictionary(&mut self, id: &str) -> bool {
        let removed = self.dictionaries.remove(id).is_some();
        if removed {
            tracing::debug!(id, "deleted dictionary");
        }
        removed
    }

    fn get_dictionary(&self, id: &str) -> Option<SharedDictionary> {
        self.dictionaries.get(id).cloned()
    }

    fn get_encoding_dictionary(
        &self,
        feature_type: Option<&str>,
        context: Option<&str>,
    ) -> Option<SharedDictionary> {
        let context = context.map(String::from);
        let feature_type = feature_type.map(String::from);
        let candidates = [
            (context.clone(), feature_type.clone()),
            (None, feature_type),
            (context, None),
            (None, None),
        ];
        candidates
            .iter()
            .filter_map(|key| self.encoding.get(key))
            .find_map(|id| self.get_dictionary(id))
    }
}
