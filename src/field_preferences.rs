//! Field preferences - user guidance that steers KG building and rule generation
//!
//! Preferences arrive as loosely-typed JSON dictionaries. They are validated on
//! ingress into [`FieldPreference`] values; nothing downstream re-checks them.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// A filter hint value. Serialized exactly as users write them:
/// a string, a list, the literal `"NOT NULL"`, or `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum FilterHint {
    Equals(String),
    In(Vec<String>),
    NotNull,
    IsNullOrEmpty,
}

impl TryFrom<Value> for FilterHint {
    type Error = String;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(FilterHint::IsNullOrEmpty),
            Value::String(s) if s.trim().eq_ignore_ascii_case("NOT NULL") => Ok(FilterHint::NotNull),
            Value::String(s) => Ok(FilterHint::Equals(s)),
            Value::Number(n) => Ok(FilterHint::Equals(n.to_string())),
            Value::Bool(b) => Ok(FilterHint::Equals(b.to_string())),
            Value::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => values.push(s),
                        Value::Number(n) => values.push(n.to_string()),
                        Value::Bool(b) => values.push(b.to_string()),
                        other => return Err(format!("unsupported list element in filter hint: {}", other)),
                    }
                }
                if values.is_empty() {
                    return Err("filter hint list must not be empty".to_string());
                }
                Ok(FilterHint::In(values))
            }
            Value::Object(_) => Err("filter hint must be a string, list, \"NOT NULL\" or null".to_string()),
        }
    }
}

impl From<FilterHint> for Value {
    fn from(hint: FilterHint) -> Self {
        match hint {
            FilterHint::Equals(s) => Value::String(s),
            FilterHint::In(values) => Value::Array(values.into_iter().map(Value::String).collect()),
            FilterHint::NotNull => Value::String("NOT NULL".to_string()),
            FilterHint::IsNullOrEmpty => Value::Null,
        }
    }
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl FilterHint {
    /// Renders the predicate for an already-formatted column expression.
    pub fn render(&self, column: &str) -> String {
        match self {
            FilterHint::Equals(v) => format!("{} = {}", column, quote_literal(v)),
            FilterHint::In(values) => format!(
                "{} IN ({})",
                column,
                values.iter().map(|v| quote_literal(v)).collect::<Vec<_>>().join(", ")
            ),
            FilterHint::NotNull => format!("{} IS NOT NULL", column),
            FilterHint::IsNullOrEmpty => format!("({} IS NULL OR {} = '')", column, column),
        }
    }
}

/// `WHERE` clause for a set of filter conditions, `None` when empty.
pub fn render_where_clause(conditions: &BTreeMap<String, FilterHint>) -> Option<String> {
    if conditions.is_empty() {
        return None;
    }
    let predicates: Vec<String> = conditions
        .iter()
        .map(|(column, hint)| hint.render(column))
        .collect();
    Some(format!("WHERE {}", predicates.join(" AND ")))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPreference {
    pub table_name: String,
    #[serde(default)]
    pub priority_fields: Vec<String>,
    #[serde(default)]
    pub exclude_fields: Vec<String>,
    #[serde(default)]
    pub field_hints: BTreeMap<String, String>,
    #[serde(default)]
    pub filter_hints: BTreeMap<String, FilterHint>,
}

impl FieldPreference {
    pub fn new(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            priority_fields: Vec::new(),
            exclude_fields: Vec::new(),
            field_hints: BTreeMap::new(),
            filter_hints: BTreeMap::new(),
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let preference: FieldPreference = serde_json::from_value(value)
            .map_err(|e| EngineError::InvalidPreference(e.to_string()))?;
        preference.validate()?;
        Ok(preference)
    }

    pub fn validate(&self) -> Result<()> {
        if self.table_name.trim().is_empty() {
            return Err(EngineError::InvalidPreference("table_name is required".to_string()));
        }
        for field in self.priority_fields.iter().chain(&self.exclude_fields) {
            if field.trim().is_empty() {
                return Err(EngineError::InvalidPreference(format!(
                    "{}: empty field name",
                    self.table_name
                )));
            }
        }
        if let Some(both) = self
            .priority_fields
            .iter()
            .find(|p| self.exclude_fields.iter().any(|e| e.eq_ignore_ascii_case(p)))
        {
            return Err(EngineError::InvalidPreference(format!(
                "{}: field '{}' is both prioritized and excluded",
                self.table_name, both
            )));
        }
        for (from, to) in &self.field_hints {
            if from.trim().is_empty() || to.trim().is_empty() {
                return Err(EngineError::InvalidPreference(format!(
                    "{}: field hints need both a source and a target column",
                    self.table_name
                )));
            }
        }
        if self.filter_hints.keys().any(|k| k.trim().is_empty()) {
            return Err(EngineError::InvalidPreference(format!(
                "{}: filter hint with empty column",
                self.table_name
            )));
        }
        Ok(())
    }

    pub fn is_excluded(&self, column: &str) -> bool {
        self.exclude_fields.iter().any(|f| f.eq_ignore_ascii_case(column))
    }

    pub fn is_priority(&self, column: &str) -> bool {
        self.priority_fields.iter().any(|f| f.eq_ignore_ascii_case(column))
    }

    pub fn applies_to(&self, schema: &str, table: &str) -> bool {
        let wanted = self.table_name.to_lowercase();
        wanted == table.to_lowercase() || wanted == format!("{}.{}", schema, table).to_lowercase()
    }
}

/// Preferences keyed by table, looked up case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct PreferenceSet {
    preferences: Vec<FieldPreference>,
}

impl PreferenceSet {
    pub fn new(preferences: Vec<FieldPreference>) -> Result<Self> {
        let mut seen = HashSet::new();
        for preference in &preferences {
            preference.validate()?;
            if !seen.insert(preference.table_name.to_lowercase()) {
                return Err(EngineError::InvalidPreference(format!(
                    "duplicate preference for table {}",
                    preference.table_name
                )));
            }
        }
        Ok(Self { preferences })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: Vec<Value> = serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidPreference(e.to_string()))?;
        let preferences = raw
            .into_iter()
            .map(FieldPreference::from_value)
            .collect::<Result<Vec<_>>>()?;
        Self::new(preferences)
    }

    pub fn for_table(&self, schema: &str, table: &str) -> Option<&FieldPreference> {
        self.preferences.iter().find(|p| p.applies_to(schema, table))
    }

    pub fn is_excluded(&self, schema: &str, table: &str, column: &str) -> bool {
        self.for_table(schema, table)
            .map(|p| p.is_excluded(column))
            .unwrap_or(false)
    }

    pub fn is_priority(&self, schema: &str, table: &str, column: &str) -> bool {
        self.for_table(schema, table)
            .map(|p| p.is_priority(column))
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldPreference> {
        self.preferences.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.preferences.is_empty()
    }

    pub fn into_vec(self) -> Vec<FieldPreference> {
        self.preferences
    }
}
