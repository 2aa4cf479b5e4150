use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::template::FieldSpec;

/// Value of one extracted field. The shape follows the field's `List` option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Scalar(String),
    List(Vec<String>),
}

impl FieldValue {
    /// An unset value with the shape declared by `spec`.
    pub fn empty_for(spec: &FieldSpec) -> Self {
        if spec.is_list() {
            FieldValue::List(Vec::new())
        } else {
            FieldValue::Scalar(String::new())
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Scalar(s) => s.is_empty(),
            FieldValue::List(items) => items.is_empty(),
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, FieldValue::List(_))
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            FieldValue::Scalar(s) => Some(s),
            FieldValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::List(items) => Some(items),
            FieldValue::Scalar(_) => None,
        }
    }

    /// The value as a sequence: a list as-is, a non-empty scalar as one item.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            FieldValue::List(items) => items.clone(),
            FieldValue::Scalar(s) if s.is_empty() => Vec::new(),
            FieldValue::Scalar(s) => vec![s.clone()],
        }
    }

    pub(crate) fn clear(&mut self) {
        match self {
            FieldValue::Scalar(s) => s.clear(),
            FieldValue::List(items) => items.clear(),
        }
    }

    /// Scalars are overwritten, lists grow.
    pub(crate) fn assign(&mut self, value: &str) {
        match self {
            FieldValue::Scalar(s) => {
                s.clear();
                s.push_str(value);
            }
            FieldValue::List(items) => items.push(value.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Scalar(s) => write!(f, "{:?}", s),
            FieldValue::List(items) => write!(f, "{:?}", items),
        }
    }
}

/// One completed extraction: field values in template declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedRecord {
    fields: Vec<(String, FieldValue)>,
}

impl ExtractedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Scalar text of `name`, or `None` when absent or list-valued.
    pub fn scalar(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_scalar)
    }

    /// Values of `name` as a sequence, empty when absent.
    pub fn values(&self, name: &str) -> Vec<String> {
        self.get(name).map(FieldValue::to_vec).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, FieldValue)> for ExtractedRecord {
    fn from_iter<T: IntoIterator<Item = (K, FieldValue)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl Serialize for ExtractedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
