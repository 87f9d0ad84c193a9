//! Control values, control lists and frame metadata.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Well-known control and metadata identifiers.
pub mod ids {
    pub const EXPOSURE_TIME: &str = "ExposureTime";
    pub const ANALOGUE_GAIN: &str = "AnalogueGain";
    pub const AE_ENABLE: &str = "AeEnable";
    pub const AWB_ENABLE: &str = "AwbEnable";
    pub const BRIGHTNESS: &str = "Brightness";
    pub const CONTRAST: &str = "Contrast";
    pub const FRAME_DURATION_LIMITS: &str = "FrameDurationLimits";
    pub const SENSOR_TIMESTAMP: &str = "SensorTimestamp";
    pub const FRAME_SEQUENCE: &str = "FrameSequence";
}

/// A single control value.
///
/// Deserialization is untagged so JSON such as `{"ExposureTime": 10000, "AeEnable": false}`
/// maps directly onto a [`ControlList`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    IntArray(Vec<i64>),
}

impl ControlValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ControlValue::Bool(v) => Some(*v),
            ControlValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ControlValue::Int(v) => Some(*v),
            ControlValue::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ControlValue::Float(v) => Some(*v),
            ControlValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl fmt::Display for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlValue::Bool(v) => write!(f, "{v}"),
            ControlValue::Int(v) => write!(f, "{v}"),
            ControlValue::Float(v) => write!(f, "{v}"),
            ControlValue::Text(v) => write!(f, "{v:?}"),
            ControlValue::IntArray(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for ControlValue {
    fn from(v: bool) -> Self {
        ControlValue::Bool(v)
    }
}

impl From<i32> for ControlValue {
    fn from(v: i32) -> Self {
        ControlValue::Int(i64::from(v))
    }
}

impl From<i64> for ControlValue {
    fn from(v: i64) -> Self {
        ControlValue::Int(v)
    }
}

impl From<u32> for ControlValue {
    fn from(v: u32) -> Self {
        ControlValue::Int(i64::from(v))
    }
}

impl From<u64> for ControlValue {
    fn from(v: u64) -> Self {
        ControlValue::Int(v as i64)
    }
}

impl From<f32> for ControlValue {
    fn from(v: f32) -> Self {
        ControlValue::Float(f64::from(v))
    }
}

impl From<f64> for ControlValue {
    fn from(v: f64) -> Self {
        ControlValue::Float(v)
    }
}

impl From<&str> for ControlValue {
    fn from(v: &str) -> Self {
        ControlValue::Text(v.to_string())
    }
}

impl From<String> for ControlValue {
    fn from(v: String) -> Self {
        ControlValue::Text(v)
    }
}

impl From<Vec<i64>> for ControlValue {
    fn from(v: Vec<i64>) -> Self {
        ControlValue::IntArray(v)
    }
}

/// Ordered map of control identifier to value.
///
/// Used both for controls written to a request and for the metadata a completed request carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControlList {
    values: BTreeMap<String, ControlValue>,
}

/// Metadata reported alongside a completed frame.
pub type Metadata = ControlList;

impl ControlList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set a control, returning the previous value if there was one.
    pub fn set(&mut self, id: impl Into<String>, value: impl Into<ControlValue>) -> Option<ControlValue> {
        self.values.insert(id.into(), value.into())
    }

    /// Builder-style variant of [`ControlList::set`].
    pub fn with(mut self, id: impl Into<String>, value: impl Into<ControlValue>) -> Self {
        self.set(id, value);
        self
    }

    pub fn get(&self, id: &str) -> Option<&ControlValue> {
        self.values.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.values.contains_key(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<ControlValue> {
        self.values.remove(id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Copy every entry of `other` into `self`; entries already present are overwritten.
    pub fn merge(&mut self, other: &ControlList) {
        for (id, value) in &other.values {
            self.values.insert(id.clone(), value.clone());
        }
    }

    /// Copy entries of `other` whose ids are not present in `self`.
    pub fn merge_missing(&mut self, other: &ControlList) {
        for (id, value) in &other.values {
            self.values.entry(id.clone()).or_insert_with(|| value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ControlValue)> {
        self.values.iter().map(|(id, value)| (id.as_str(), value))
    }
}

impl<K, V> FromIterator<(K, V)> for ControlList
where
    K: Into<String>,
    V: Into<ControlValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut list = ControlList::new();
        for (id, value) in iter {
            list.set(id, value);
        }
        list
    }
}

impl IntoIterator for ControlList {
    type Item = (String, ControlValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, ControlValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overwrites_and_merge_missing_keeps() {
        let mut staged: ControlList = [("ExposureTime", 1000)].into_iter().collect();
        staged.merge(&ControlList::new().with("ExposureTime", 2000).with("AeEnable", false));
        assert_eq!(staged.get("ExposureTime"), Some(&ControlValue::Int(2000)));

        staged.merge_missing(&ControlList::new().with("ExposureTime", 5).with("Contrast", 1.5));
        assert_eq!(staged.get("ExposureTime"), Some(&ControlValue::Int(2000)));
        assert_eq!(staged.get("Contrast"), Some(&ControlValue::Float(1.5)));
        assert_eq!(staged.len(), 3);
    }

    #[test]
    fn parses_untagged_json() {
        let list = ControlList::from_json_str(
            r#"{"ExposureTime": 10000, "AnalogueGain": 2.5, "AeEnable": false, "FrameDurationLimits": [33333, 33333]}"#,
        )
        .unwrap();
        assert_eq!(list.get(ids::EXPOSURE_TIME).and_then(ControlValue::as_int), Some(10000));
        assert_eq!(list.get(ids::ANALOGUE_GAIN).and_then(ControlValue::as_float), Some(2.5));
        assert_eq!(list.get(ids::AE_ENABLE).and_then(ControlValue::as_bool), Some(false));
        assert_eq!(
            list.get(ids::FRAME_DURATION_LIMITS),
            Some(&ControlValue::IntArray(vec![33333, 33333]))
        );
    }
}
