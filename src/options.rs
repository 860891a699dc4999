use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// A configuration value. Lists nest one level for 1-D options and two
/// levels for matrix options such as `energybins`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<OptionValue>),
}

impl OptionValue {
    pub fn is_null(&self) -> bool {
        matches!(self, OptionValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OptionValue::Int(value) => Some(*value as f64),
            OptionValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            OptionValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[OptionValue]> {
        match self {
            OptionValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_f64_list(&self) -> Option<Vec<f64>> {
        self.as_list()?.iter().map(OptionValue::as_f64).collect()
    }

    pub fn as_f64_matrix(&self) -> Option<Vec<Vec<f64>>> {
        self.as_list()?
            .iter()
            .map(OptionValue::as_f64_list)
            .collect()
    }

    fn type_name(&self) -> String {
        match self {
            OptionValue::Null => "null".to_string(),
            OptionValue::Bool(_) => "bool".to_string(),
            OptionValue::Int(_) => "int".to_string(),
            OptionValue::Float(value) if !value.is_finite() => format!("non-finite float {value}"),
            OptionValue::Float(_) => "float".to_string(),
            OptionValue::Str(_) => "str".to_string(),
            OptionValue::List(items) => match items.first() {
                Some(first) => format!("list of {}", first.type_name()),
                None => "empty list".to_string(),
            },
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Null => write!(f, "null"),
            OptionValue::Bool(value) => write!(f, "{value}"),
            OptionValue::Int(value) => write!(f, "{value}"),
            OptionValue::Float(value) => write!(f, "{value}"),
            OptionValue::Str(value) => write!(f, "{value}"),
            OptionValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<i32> for OptionValue {
    fn from(value: i32) -> Self {
        OptionValue::Int(value as i64)
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        OptionValue::Float(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Str(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Str(value)
    }
}

impl<T: Into<OptionValue>> From<Vec<T>> for OptionValue {
    fn from(values: Vec<T>) -> Self {
        OptionValue::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<OptionValue>> From<Option<T>> for OptionValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(OptionValue::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Float,
    /// Int or float.
    Number,
    Str,
    Bool,
}

impl ValueKind {
    fn accepts(self, value: &OptionValue) -> bool {
        match (self, value) {
            (ValueKind::Int, OptionValue::Int(_)) => true,
            (ValueKind::Float | ValueKind::Number, OptionValue::Int(_)) => true,
            (ValueKind::Float | ValueKind::Number, OptionValue::Float(value)) => value.is_finite(),
            (ValueKind::Str, OptionValue::Str(_)) => true,
            (ValueKind::Bool, OptionValue::Bool(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Int => write!(f, "int"),
            ValueKind::Float => write!(f, "float"),
            ValueKind::Number => write!(f, "number"),
            ValueKind::Str => write!(f, "str"),
            ValueKind::Bool => write!(f, "bool"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    List,
    Matrix,
}

#[derive(Debug, Clone)]
pub struct OptionSpec {
    pub section: &'static str,
    pub name: &'static str,
    pub kind: ValueKind,
    pub shape: Shape,
    pub nullable: bool,
    pub updatable: bool,
    pub hidden: bool,
    pub default: OptionValue,
}

impl OptionSpec {
    pub fn new(
        section: &'static str,
        name: &'static str,
        kind: ValueKind,
        default: impl Into<OptionValue>,
    ) -> Self {
        Self {
            section,
            name,
            kind,
            shape: Shape::Scalar,
            nullable: false,
            updatable: true,
            hidden: false,
            default: default.into(),
        }
    }

    pub fn list(mut self) -> Self {
        self.shape = Shape::List;
        self
    }

    pub fn matrix(mut self) -> Self {
        self.shape = Shape::Matrix;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn fixed(mut self) -> Self {
        self.updatable = false;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn check(&self, value: &OptionValue) -> Result<(), AnalysisError> {
        if value.is_null() && self.nullable {
            return Ok(());
        }
        let ok = match self.shape {
            Shape::Scalar => self.kind.accepts(value),
            Shape::List => value
                .as_list()
                .map(|items| items.iter().all(|item| self.kind.accepts(item)))
                .unwrap_or(false),
            Shape::Matrix => value
                .as_list()
                .map(|rows| {
                    rows.iter().all(|row| {
                        row.as_list()
                            .map(|items| items.iter().all(|item| self.kind.accepts(item)))
                            .unwrap_or(false)
                    })
                })
                .unwrap_or(false),
        };
        if ok {
            Ok(())
        } else {
            Err(AnalysisError::OptionTypeError {
                option: self.name.to_string(),
                expected: self.describe(),
                got: value.type_name(),
            })
        }
    }

    fn describe(&self) -> String {
        let base = match self.shape {
            Shape::Scalar => self.kind.to_string(),
            Shape::List => format!("list of {}", self.kind),
            Shape::Matrix => format!("2-D list of {}", self.kind),
        };
        if self.nullable {
            format!("{base} or null")
        } else {
            base
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct OptionEntry {
    section: &'static str,
    value: OptionValue,
}

/// Flat name-indexed option storage that remembers each option's section.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OptionSet {
    entries: BTreeMap<String, OptionEntry>,
}

impl OptionSet {
    pub fn from_specs(specs: &[OptionSpec]) -> Self {
        let entries = specs
            .iter()
            .map(|spec| {
                (
                    spec.name.to_string(),
                    OptionEntry {
                        section: spec.section,
                        value: spec.default.clone(),
                    },
                )
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.entries.get(name).map(|entry| &entry.value)
    }

    pub fn section_of(&self, name: &str) -> Option<&'static str> {
        self.entries.get(name).map(|entry| entry.section)
    }

    /// Overwrites an existing option. Unknown names are ignored; callers
    /// check names against the schema first.
    pub fn put(&mut self, name: &str, value: OptionValue) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.value = value;
        }
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(OptionValue::as_f64)
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(OptionValue::as_i64)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(OptionValue::as_str)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(OptionValue::as_bool)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut sections = serde_json::Map::new();
        for (name, entry) in &self.entries {
            let section = sections
                .entry(entry.section.to_string())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            if let serde_json::Value::Object(map) = section {
                let value =
                    serde_json::to_value(&entry.value).unwrap_or(serde_json::Value::Null);
                map.insert(name.clone(), value);
            }
        }
        serde_json::Value::Object(sections)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn number_accepts_ints() {
        let spec = OptionSpec::new("selection", "emin", ValueKind::Number, 100);
        assert!(spec.check(&OptionValue::Int(30)).is_ok());
        assert!(spec.check(&OptionValue::Float(30.5)).is_ok());
        let err = spec.check(&OptionValue::Str("30".into())).unwrap_err();
        assert_matches!(err, AnalysisError::OptionTypeError { .. });
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        let spec = OptionSpec::new("selection", "tmin", ValueKind::Number, 0);
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert_matches!(
                spec.check(&OptionValue::Float(value)),
                Err(AnalysisError::OptionTypeError { .. })
            );
        }
        let list = OptionSpec::new("bkg", "galcoeff", ValueKind::Number, vec![-1.0]).list();
        assert!(list.check(&vec![0.5, f64::NAN].into()).is_err());
    }

    #[test]
    fn matrix_shape_is_enforced() {
        let spec = OptionSpec::new("maps", "energybins", ValueKind::Number, vec![vec![100, 10000]])
            .matrix();
        assert!(spec.check(&vec![vec![100, 300], vec![300, 1000]].into()).is_ok());
        assert!(spec.check(&vec![100, 300].into()).is_err());
        assert!(spec.check(&OptionValue::Null).is_err());
    }

    #[test]
    fn untagged_json_keeps_int_and_float_apart() {
        let value: OptionValue = serde_json::from_str("[[100, 300], [1.5, 2]]").unwrap();
        assert_eq!(
            value,
            OptionValue::List(vec![
                OptionValue::List(vec![OptionValue::Int(100), OptionValue::Int(300)]),
                OptionValue::List(vec![OptionValue::Float(1.5), OptionValue::Int(2)]),
            ])
        );
    }
}
