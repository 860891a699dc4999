use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::sync::Arc;

use camino::Utf8Path;
use tracing::debug;

use crate::error::AnalysisError;
use crate::notify::{ListenerId, ListenerRegistry, OptionListener};
use crate::options::{OptionSet, OptionValue};
use crate::schema::{AnalysisClass, ConfigSchema};
use crate::store::Store;

/// Validated, observable option store. Each instance owns its listeners;
/// snapshots start without any.
pub struct ConfigStore {
    options: OptionSet,
    schema: Arc<dyn ConfigSchema>,
    listeners: ListenerRegistry,
}

/// An independent copy of a configuration owned by one orchestration call.
pub type ConfigSnapshot = ConfigStore;

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore")
            .field("class", &self.schema.class())
            .field("options", &self.options)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ConfigStore {
    pub fn with_defaults(class: AnalysisClass) -> Result<Self, AnalysisError> {
        Self::from_sections(BTreeMap::new(), class)
    }

    pub fn load(path: &Utf8Path, class: AnalysisClass) -> Result<Self, AnalysisError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| AnalysisError::ConfigRead(path.to_path_buf()))?;
        let store = Self::from_json_str(&content, class)?;
        debug!(path = %path, class = %class, "configuration loaded");
        Ok(store)
    }

    pub fn from_json_str(content: &str, class: AnalysisClass) -> Result<Self, AnalysisError> {
        let sections: BTreeMap<String, BTreeMap<String, OptionValue>> =
            serde_json::from_str(content).map_err(|err| AnalysisError::ConfigParse(err.to_string()))?;
        Self::from_sections(sections, class)
    }

    fn from_sections(
        sections: BTreeMap<String, BTreeMap<String, OptionValue>>,
        class: AnalysisClass,
    ) -> Result<Self, AnalysisError> {
        let schema = class.schema();
        let mut options = OptionSet::from_specs(schema.specs());

        for (section, values) in sections {
            for (name, value) in values {
                let spec = schema
                    .spec(&name)
                    .ok_or_else(|| AnalysisError::OptionNotFound(name.clone()))?;
                if spec.section != section {
                    return Err(AnalysisError::ConfigParse(format!(
                        "option {name} belongs to section {}, found in {section}",
                        spec.section
                    )));
                }
                if spec.hidden {
                    return Err(AnalysisError::CannotSetHidden(name));
                }
                spec.check(&value)?;
                options.put(&name, value);
            }
        }

        let touched: Vec<String> = options.names().map(str::to_string).collect();
        schema.complete(&mut options, &touched);
        let errors = schema.validate(&options);
        if !errors.is_empty() {
            return Err(AnalysisError::ConfigurationInvalid { errors });
        }

        Ok(Self {
            options,
            schema,
            listeners: ListenerRegistry::new(),
        })
    }

    pub fn class(&self) -> AnalysisClass {
        self.schema.class()
    }

    pub fn get(&self, name: &str) -> Result<&OptionValue, AnalysisError> {
        self.options
            .get(name)
            .ok_or_else(|| AnalysisError::OptionNotFound(name.to_string()))
    }

    pub fn section_of(&self, name: &str) -> Result<&'static str, AnalysisError> {
        self.options
            .section_of(name)
            .ok_or_else(|| AnalysisError::OptionNotFound(name.to_string()))
    }

    pub fn get_f64(&self, name: &str) -> Result<f64, AnalysisError> {
        let value = self.get(name)?;
        value.as_f64().ok_or_else(|| type_error(name, "number", value))
    }

    pub fn get_opt_f64(&self, name: &str) -> Result<Option<f64>, AnalysisError> {
        let value = self.get(name)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_f64()
            .map(Some)
            .ok_or_else(|| type_error(name, "number", value))
    }

    pub fn get_i64(&self, name: &str) -> Result<i64, AnalysisError> {
        let value = self.get(name)?;
        value.as_i64().ok_or_else(|| type_error(name, "int", value))
    }

    pub fn get_str(&self, name: &str) -> Result<&str, AnalysisError> {
        let value = self.get(name)?;
        value.as_str().ok_or_else(|| type_error(name, "str", value))
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, AnalysisError> {
        let value = self.get(name)?;
        value.as_bool().ok_or_else(|| type_error(name, "bool", value))
    }

    pub fn get_f64_list(&self, name: &str) -> Result<Vec<f64>, AnalysisError> {
        let value = self.get(name)?;
        value
            .as_f64_list()
            .ok_or_else(|| type_error(name, "list of number", value))
    }

    pub fn get_f64_matrix(&self, name: &str) -> Result<Vec<Vec<f64>>, AnalysisError> {
        let value = self.get(name)?;
        value
            .as_f64_matrix()
            .ok_or_else(|| type_error(name, "2-D list of number", value))
    }

    /// True when the option exists and holds a non-null value.
    pub fn is_set(&self, name: &str) -> bool {
        self.options.get(name).is_some_and(|value| !value.is_null())
    }

    /// Applies a batch of updates atomically: either every option is
    /// committed and its listeners notified, or nothing changes. Options
    /// named in the batch are notified first, in batch order, followed by
    /// any option that completion changed as a consequence.
    pub fn set<I, K, V>(&mut self, updates: I) -> Result<(), AnalysisError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<OptionValue>,
    {
        let mut batch: Vec<(String, OptionValue)> = Vec::new();
        for (name, value) in updates {
            let name = name.into();
            let value = value.into();
            let spec = self
                .schema
                .spec(&name)
                .ok_or_else(|| AnalysisError::OptionNotFound(name.clone()))?;
            if spec.hidden {
                return Err(AnalysisError::CannotSetHidden(name));
            }
            if !spec.updatable {
                return Err(AnalysisError::CannotUpdate(name));
            }
            spec.check(&value)?;
            match batch.iter_mut().find(|(existing, _)| *existing == name) {
                Some(entry) => entry.1 = value,
                None => batch.push((name, value)),
            }
        }
        if batch.is_empty() {
            return Ok(());
        }

        let mut working = self.options.clone();
        for (name, value) in &batch {
            working.put(name, value.clone());
        }
        let touched: Vec<String> = batch.iter().map(|(name, _)| name.clone()).collect();
        self.schema.complete(&mut working, &touched);
        let errors = self.schema.validate(&working);
        if !errors.is_empty() {
            return Err(AnalysisError::ConfigurationInvalid { errors });
        }

        let previous = std::mem::replace(&mut self.options, working);
        let derived: Vec<&str> = self
            .schema
            .specs()
            .iter()
            .map(|spec| spec.name)
            .filter(|&name| !touched.iter().any(|t| t == name))
            .filter(|&name| previous.get(name) != self.options.get(name))
            .collect();
        for name in touched.iter().map(String::as_str).chain(derived) {
            if let Some(value) = self.options.get(name) {
                debug!(option = %name, value = %value, "option updated");
                self.listeners.notify(name, value);
            }
        }
        Ok(())
    }

    pub fn set_option(
        &mut self,
        name: &str,
        value: impl Into<OptionValue>,
    ) -> Result<(), AnalysisError> {
        self.set([(name, value.into())])
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        Self {
            options: self.options.clone(),
            schema: Arc::clone(&self.schema),
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn subscribe(
        &mut self,
        option: &str,
        listener: Arc<dyn OptionListener>,
    ) -> Result<ListenerId, AnalysisError> {
        if self.options.get(option).is_none() {
            return Err(AnalysisError::OptionNotFound(option.to_string()));
        }
        Ok(self.listeners.subscribe(option, listener))
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Sectioned document of every option except hidden ones, so the
    /// output can be loaded back.
    pub fn to_json(&self) -> serde_json::Value {
        let mut json = self.options.to_json();
        if let serde_json::Value::Object(sections) = &mut json {
            for spec in self.schema.specs().iter().filter(|spec| spec.hidden) {
                if let Some(serde_json::Value::Object(section)) = sections.get_mut(spec.section) {
                    section.remove(spec.name);
                }
            }
            sections.retain(|_, section| section.as_object().is_none_or(|map| !map.is_empty()));
        }
        json
    }

    pub fn write(&self, path: &Utf8Path) -> Result<(), AnalysisError> {
        let content = serde_json::to_vec_pretty(&self.to_json())
            .map_err(|err| AnalysisError::Filesystem(err.to_string()))?;
        Store::write_bytes_atomic(path, &content)
    }
}

fn type_error(name: &str, expected: &str, value: &OptionValue) -> AnalysisError {
    AnalysisError::OptionTypeError {
        option: name.to_string(),
        expected: expected.to_string(),
        got: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_sectioned_config() {
        let config = ConfigStore::from_json_str(
            r#"{
                "input": {"evtfile": "/data/EVT.index"},
                "selection": {"tmin": 433857532, "tmax": 434289532, "glon": 79.8, "glat": 0.7},
                "maps": {"energybins": [[100, 300], [300, 1000]], "fovbinnumber": 2}
            }"#,
            AnalysisClass::Mle,
        )
        .unwrap();

        assert_eq!(config.get_str("evtfile").unwrap(), "/data/EVT.index");
        assert_eq!(config.section_of("glon").unwrap(), "selection");
        assert_eq!(config.get_i64("bkgcoeffcount").unwrap(), 4);
        assert_eq!(config.get_f64_list("galcoeff").unwrap(), vec![-1.0; 4]);
    }

    #[test]
    fn option_in_wrong_section_is_rejected() {
        let err = ConfigStore::from_json_str(r#"{"output": {"emin": 100}}"#, AnalysisClass::Mle)
            .unwrap_err();
        assert_matches!(err, AnalysisError::ConfigParse(_));
    }

    #[test]
    fn hidden_option_cannot_be_loaded() {
        let err = ConfigStore::from_json_str(
            r#"{"hidden": {"bkgcoeffcount": 3}}"#,
            AnalysisClass::Mle,
        )
        .unwrap_err();
        assert_matches!(err, AnalysisError::CannotSetHidden(_));
    }

    #[test]
    fn fixed_option_loads_but_cannot_be_set() {
        let mut config = ConfigStore::from_json_str(
            r#"{"output": {"username": "agile"}}"#,
            AnalysisClass::Mle,
        )
        .unwrap();
        assert_eq!(config.get_str("username").unwrap(), "agile");
        let err = config.set_option("username", "other").unwrap_err();
        assert_matches!(err, AnalysisError::CannotUpdate(_));
    }
}
