//! AMF0 value model
//!
//! Objects and ECMA arrays keep their properties in wire order. Command
//! objects and `onMetaData` are small, so lookups are linear.

/// Ordered property list of an object or ECMA array
pub type AmfObject = Vec<(String, AmfValue)>;

/// AMF0 value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AmfValue {
    /// 0x00
    Number(f64),
    /// 0x01
    Boolean(bool),
    /// 0x02 / 0x0C (long string)
    String(String),
    /// 0x03
    Object(AmfObject),
    /// 0x05
    #[default]
    Null,
    /// 0x06, also used for unsupported markers
    Undefined,
    /// 0x08
    EcmaArray(AmfObject),
    /// 0x0A
    StrictArray(Vec<AmfValue>),
    /// 0x0B, milliseconds since the Unix epoch
    Date(f64),
}

impl AmfValue {
    /// Build an anonymous object from `(key, value)` pairs
    pub fn object<K, I>(props: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, AmfValue)>,
    {
        AmfValue::Object(props.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build an ECMA array from `(key, value)` pairs
    pub fn ecma_array<K, I>(props: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, AmfValue)>,
    {
        AmfValue::EcmaArray(props.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Properties of an object or ECMA array
    pub fn as_object(&self) -> Option<&AmfObject> {
        match self {
            AmfValue::Object(props) | AmfValue::EcmaArray(props) => Some(props),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[AmfValue]> {
        match self {
            AmfValue::StrictArray(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, AmfValue::Null | AmfValue::Undefined)
    }

    /// First property named `key`
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.as_object()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }

    /// Numbers of a strict array property, skipping non-numbers
    pub fn get_numbers(&self, key: &str) -> Vec<f64> {
        self.get(key)
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_number()).collect())
            .unwrap_or_default()
    }
}

impl From<bool> for AmfValue {
    fn from(v: bool) -> Self {
        AmfValue::Boolean(v)
    }
}

impl From<f64> for AmfValue {
    fn from(v: f64) -> Self {
        AmfValue::Number(v)
    }
}

impl From<u32> for AmfValue {
    fn from(v: u32) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<&str> for AmfValue {
    fn from(v: &str) -> Self {
        AmfValue::String(v.to_string())
    }
}

impl From<String> for AmfValue {
    fn from(v: String) -> Self {
        AmfValue::String(v)
    }
}
