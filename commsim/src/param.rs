use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamRecord {
    pub name: String,
    pub value: ParamValue,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub note: String,
}

/// Ordered parameter table of one block. Order is kept as declared by the transform.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamTable {
    records: Vec<ParamRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultValue {
    Number(f64),
    Text(String),
    Series(Vec<f64>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub label: String,
    pub value: ResultValue,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub note: String,
    #[serde(default = "default_display")]
    pub display: bool,
}

fn default_display() -> bool {
    true
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(value) => Some(*value),
            ParamValue::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_float_list(&self) -> Option<Vec<f64>> {
        match self {
            ParamValue::FloatList(values) => Some(values.clone()),
            ParamValue::IntList(values) => Some(values.iter().map(|&v| v as f64).collect()),
            _ => None,
        }
    }

    pub fn as_int_list(&self) -> Option<&[i64]> {
        match self {
            ParamValue::IntList(values) => Some(values),
            _ => None,
        }
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}
impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}
impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}
impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}
impl From<Vec<f64>> for ParamValue {
    fn from(value: Vec<f64>) -> Self {
        ParamValue::FloatList(value)
    }
}
impl From<Vec<i64>> for ParamValue {
    fn from(value: Vec<i64>) -> Self {
        ParamValue::IntList(value)
    }
}

impl ParamRecord {
    pub fn new(name: &str, value: impl Into<ParamValue>, unit: &str) -> Self {
        ParamRecord {
            name: name.to_string(),
            value: value.into(),
            unit: unit.to_string(),
            note: String::new(),
        }
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.note = note.to_string();
        self
    }
}

impl ParamTable {
    pub fn new(records: Vec<ParamRecord>) -> Self {
        ParamTable { records }
    }

    pub fn records(&self) -> &[ParamRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.records
            .iter()
            .find(|record| record.name == name)
            .map(|record| &record.value)
    }

    pub fn f64_or(&self, name: &str, default: f64) -> f64 {
        self.get(name).and_then(ParamValue::as_f64).unwrap_or(default)
    }

    pub fn i64_or(&self, name: &str, default: i64) -> i64 {
        self.get(name).and_then(ParamValue::as_i64).unwrap_or(default)
    }

    /// Replaces the value of an existing record, or appends a new one with no unit.
    pub fn set(&mut self, name: &str, value: impl Into<ParamValue>) {
        let value = value.into();
        match self.records.iter_mut().find(|record| record.name == name) {
            Some(record) => record.value = value,
            None => self.records.push(ParamRecord::new(name, value, "")),
        }
    }

    pub fn push(&mut self, record: ParamRecord) {
        self.records.push(record);
    }
}

impl FromIterator<ParamRecord> for ParamTable {
    fn from_iter<T: IntoIterator<Item = ParamRecord>>(iter: T) -> Self {
        ParamTable {
            records: iter.into_iter().collect(),
        }
    }
}

impl ResultValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ResultValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    /// `true` when the value carries NaN or an infinity anywhere.
    pub fn is_non_finite(&self) -> bool {
        match self {
            ResultValue::Number(value) => !value.is_finite(),
            ResultValue::Text(_) => false,
            ResultValue::Series(values) => values.iter().any(|value| !value.is_finite()),
        }
    }
}

impl ResultRecord {
    pub fn number(label: &str, value: f64, unit: &str) -> Self {
        ResultRecord {
            label: label.to_string(),
            value: ResultValue::Number(value),
            unit: unit.to_string(),
            note: String::new(),
            display: true,
        }
    }

    pub fn text(label: &str, value: &str) -> Self {
        ResultRecord {
            label: label.to_string(),
            value: ResultValue::Text(value.to_string()),
            unit: String::new(),
            note: String::new(),
            display: true,
        }
    }

    pub fn series(label: &str, values: Vec<f64>, unit: &str) -> Self {
        ResultRecord {
            label: label.to_string(),
            value: ResultValue::Series(values),
            unit: unit.to_string(),
            note: String::new(),
            display: false,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.display = false;
        self
    }
}
