use std::{borrow::Cow, collections::HashMap, fmt::Display};

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

/// A value threaded through a flow run.
///
/// Almost every value is textual: required inputs given by the caller and
/// everything the extraction engine produces. `Bytes` exists for callers who
/// need to seed a flow with binary material; it is rendered lossily into
/// templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Text(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
        }
    }

    pub fn as_str(&self) -> Cow<'_, str> {
        match self {
            Value::Text(s) => Cow::Borrowed(s.as_str()),
            Value::Bytes(b) => b.to_str_lossy(),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Value::Text(s) }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::Text(s.to_string()) }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self { Value::Bytes(b) }
}

/// Key to value mapping owned by a single flow execution. Entries are only
/// ever added or overwritten, never removed.
pub type ValueStore = HashMap<String, Value>;

/// Returns the first key of `keys` that is absent from `values` or empty.
pub(crate) fn first_missing<'a, I>(keys: I, values: &ValueStore) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>
{
    for key in keys {
        match values.get(key) {
            Some(value) if !value.is_empty() => {},
            _ => return Some(key.as_str())
        }
    }

    None
}
