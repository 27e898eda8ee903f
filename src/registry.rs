//! Exchange Mapping Registry (C1, spec §4.1).

use crate::errors::RegistryError;
use crate::model::ExchangeMapping;
use std::collections::BTreeMap;
use std::path::Path;

/// Reserved exchange ids that are never declarable in the mapping document
/// but are valid arguments to [`Registry::get`] (spec §4.1, §6.3).
pub const RESERVED_IDS: &[&str] = &["unknown", "auto", "ml"];

/// The default mapping document shipped with the binary, used when no
/// `--mappings` path is given (spec §4.1).
const DEFAULT_MAPPINGS_RON: &str = include_str!("../config/exchanges.ron");

/// Read-only, load-once registry of per-exchange field mappings (spec §3.7).
#[derive(Clone, Debug)]
pub struct Registry {
    mappings: BTreeMap<String, ExchangeMapping>,
}

impl Registry {
    /// Loads the registry from a RON document at `path`.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron_str(&text)
    }

    /// Loads the registry from the mapping document embedded in the binary.
    pub fn load_default() -> Result<Self, RegistryError> {
        Self::from_ron_str(DEFAULT_MAPPINGS_RON)
    }

    fn from_ron_str(text: &str) -> Result<Self, RegistryError> {
        let raw: BTreeMap<String, ExchangeMapping> =
            ron::from_str(text).map_err(|e| RegistryError::ConfigError(e.to_string()))?;

        for id in raw.keys() {
            if RESERVED_IDS.contains(&id.as_str()) {
                return Err(RegistryError::ConfigError(format!(
                    "exchange id '{id}' is reserved and cannot be declared"
                )));
            }
            if id.to_lowercase() != *id {
                return Err(RegistryError::ConfigError(format!(
                    "exchange id '{id}' must be lowercase"
                )));
            }
        }

        Ok(Self { mappings: raw })
    }

    /// Returns the mapping for `id`, or `None` for the reserved ids (which
    /// carry no declarative mapping, only classifier-driven inference).
    pub fn get(&self, id: &str) -> Result<Option<&ExchangeMapping>, RegistryError> {
        if RESERVED_IDS.contains(&id) {
            return Ok(None);
        }
        self.mappings
            .get(id)
            .map(Some)
            .ok_or_else(|| RegistryError::UnknownExchange(id.to_string()))
    }

    pub fn list_ids(&self) -> impl Iterator<Item = &str> {
        self.mappings.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExchangeMapping)> {
        self.mappings.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_embedded_default_mappings() {
        let registry = Registry::load_default().expect("default mappings must parse");
        assert!(registry.list_ids().count() >= 5);
    }

    #[test]
    fn reserved_ids_return_no_mapping() {
        let registry = Registry::load_default().unwrap();
        for id in RESERVED_IDS {
            assert!(registry.get(id).unwrap().is_none());
        }
    }

    #[test]
    fn unknown_id_is_an_error() {
        let registry = Registry::load_default().unwrap();
        assert!(matches!(
            registry.get("definitely-not-an-exchange"),
            Err(RegistryError::UnknownExchange(_))
        ));
    }

    #[test]
    fn rejects_reserved_id_as_declaration() {
        let doc = r#"{ "ml": (fields: {}) }"#;
        assert!(matches!(
            Registry::from_ron_str(doc),
            Err(RegistryError::ConfigError(_))
        ));
    }
}
