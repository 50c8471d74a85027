//! Rows and the ordered field metadata that describes them

use crate::core::error::StepError;
use crate::core::value::Value;
use crate::core::value_meta::ValueMeta;
use serde::Serialize;
use std::collections::HashMap;

/// An ordered sequence of values, positionally aligned with a [`RowMeta`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value at `index`, null when the row is shorter
    pub fn value(&self, index: usize) -> &Value {
        const NULL: &Value = &Value::Null;
        self.values.get(index).unwrap_or(NULL)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.values.push(value.into());
    }

    /// Returns a new row with `extra` appended
    pub fn extended<I>(&self, extra: I) -> Row
    where
        I: IntoIterator<Item = Value>,
    {
        let mut values = self.values.clone();
        values.extend(extra);
        Row { values }
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

impl FromIterator<Value> for Row {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Row::new(iter.into_iter().collect())
    }
}

/// Ordered field descriptions with a name index
///
/// Lookups are exact first and fall back to a case-insensitive match.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowMeta {
    fields: Vec<ValueMeta>,

    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl RowMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: Vec<ValueMeta>) -> Self {
        let mut meta = Self::new();
        for field in fields {
            meta.add(field);
        }
        meta
    }

    /// Appends a field; a duplicate name shadows nothing, the first one wins lookups
    pub fn add(&mut self, field: ValueMeta) {
        self.index.entry(field.name.clone()).or_insert(self.fields.len());
        self.fields.push(field);
    }

    pub fn with_field(mut self, field: ValueMeta) -> Self {
        self.add(field);
        self
    }

    /// This layout followed by all fields of `other`
    pub fn merged(&self, other: &RowMeta) -> RowMeta {
        let mut meta = self.clone();
        for field in &other.fields {
            meta.add(field.clone());
        }
        meta
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, index: usize) -> Option<&ValueMeta> {
        self.fields.get(index)
    }

    pub fn fields(&self) -> &[ValueMeta] {
        &self.fields
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied().or_else(|| {
            self.fields
                .iter()
                .position(|f| f.name.eq_ignore_ascii_case(name))
        })
    }

    pub fn search(&self, name: &str) -> Option<&ValueMeta> {
        self.index_of(name).and_then(|i| self.fields.get(i))
    }

    /// Resolves a referenced field, failing with [`StepError::FieldNotFound`]
    pub fn require_index(&self, name: &str) -> Result<usize, StepError> {
        self.index_of(name)
            .ok_or_else(|| StepError::FieldNotFound(name.to_string()))
    }

    /// Same field count, names and types in the same order
    pub fn same_shape(&self, other: &RowMeta) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(&other.fields)
                .all(|(a, b)| a.name == b.name && a.value_type == b.value_type)
    }

    /// Renders a row as `[a, b, <null>]` for log messages
    pub fn describe_row(&self, row: &Row) -> String {
        let parts: Vec<String> = row
            .values()
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let rendered = match self.fields.get(i) {
                    Some(meta) => meta.format_value(value).ok().flatten(),
                    None => Some(format!("{:?}", value)),
                };
                rendered.unwrap_or_else(|| "<null>".to_string())
            })
            .collect();
        format!("[{}]", parts.join(", "))
    }
}
