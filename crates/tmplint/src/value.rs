//! value representation
//!
//! Every data layer (values files, overrides, computed output) is converted into this model
//! before merging. It contains the following data types
//! - null
//! - boolean (true/false)
//! - integer (signed, i64)
//! - decimal (f64)
//! - string (utf-8)
//! - array ("list" of values)
//! - object (order-preserving "map"/"dictionary", where the key is of type string)
//!
//! Object keys are always strings. Documents with non-string keys (`1: one` in yaml) get
//! their keys stringified on conversion.
use serde::{
    ser::{SerializeMap, SerializeSeq},
    Serializer,
};

/// All possible value types
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    String(String),
    Array(Vec<Value>),
    Object(indexmap::IndexMap<String, Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Object(Default::default())
    }
}

impl Value {
    /// Infer the type of a scalar given on the command line
    ///
    /// `true`/`false` become booleans, then integers and decimals are tried. Everything else
    /// stays a string.
    pub fn infer(raw: &str) -> Value {
        match raw {
            "true" => return Value::Boolean(true),
            "false" => return Value::Boolean(false),
            _ => {}
        }

        if let Ok(int) = raw.parse::<i64>() {
            return Value::Integer(int);
        }

        // f64::from_str also accepts "inf" and "NaN"
        let numeric = raw.chars().any(|c| c.is_ascii_digit())
            && raw
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));
        if numeric {
            if let Ok(decimal) = raw.parse::<f64>() {
                return Value::Decimal(decimal);
            }
        }

        Value::String(raw.to_string())
    }

    /// Look up a single step: a key in an object or a numeric index in an array
    pub fn get(&self, step: &str) -> Option<&Value> {
        match self {
            Value::Object(object) => object.get(step),
            Value::Array(array) => step.parse::<usize>().ok().and_then(|idx| array.get(idx)),
            _ => None,
        }
    }

    pub fn lookup<'a, I>(&self, steps: I) -> Option<&Value>
    where
        I: IntoIterator<Item = &'a str>,
    {
        steps
            .into_iter()
            .try_fold(self, |current, step| current.get(step))
    }

    /// Template truthiness: false, zero, null and empty collections are false
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Decimal(d) => *d != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

/// Text form used when a value is printed by a template action
impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::String(s) => f.write_str(s),
            Value::Array(array) => {
                f.write_str("[")?;
                for (idx, element) in array.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{element}")?;
                }
                f.write_str("]")
            }
            Value::Object(object) => {
                f.write_str("map[")?;
                for (idx, (key, value)) in object.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{key}:{value}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Decimal(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::Array(value.into_iter().map(Into::into).collect())
    }
}

impl From<serde_yaml::Number> for Value {
    fn from(value: serde_yaml::Number) -> Self {
        if let Some(int) = value.as_i64() {
            return Value::Integer(int);
        }

        // u64 beyond i64::MAX ends up here as well
        Value::Decimal(value.as_f64().unwrap_or(f64::NAN))
    }
}

impl From<serde_yaml::Value> for Value {
    fn from(value: serde_yaml::Value) -> Self {
        use serde_yaml::Value as Yaml;

        match value {
            Yaml::Null => Value::Null,
            Yaml::Bool(b) => b.into(),
            Yaml::Number(n) => n.into(),
            Yaml::String(s) => s.into(),
            Yaml::Sequence(seq) => seq.into(),
            Yaml::Mapping(mapping) => Value::Object(
                mapping
                    .into_iter()
                    .map(|(k, v)| (yaml_key(k), v.into()))
                    .collect(),
            ),
            Yaml::Tagged(tagged) => tagged.value.into(),
        }
    }
}

fn yaml_key(key: serde_yaml::Value) -> String {
    match Value::from(key) {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match value {
            Json::Null => Value::Null,
            Json::Bool(b) => b.into(),
            Json::Number(n) => match n.as_i64() {
                Some(int) => Value::Integer(int),
                None => Value::Decimal(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => s.into(),
            Json::Array(array) => array.into(),
            Json::Object(object) => {
                Value::Object(object.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl serde::ser::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Boolean(value) => serializer.serialize_bool(*value),
            Value::Integer(value) => serializer.serialize_i64(*value),
            Value::Decimal(value) => serializer.serialize_f64(*value),
            Value::String(value) => serializer.serialize_str(value),
            Value::Array(value) => {
                let mut ser = serializer.serialize_seq(Some(value.len()))?;
                for element in value {
                    ser.serialize_element(element)?;
                }
                ser.end()
            }
            Value::Object(value) => {
                let mut ser = serializer.serialize_map(Some(value.len()))?;
                for (element_key, element_value) in value {
                    ser.serialize_entry(element_key, element_value)?;
                }
                ser.end()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn infer_scalars() {
        assert_eq!(Value::infer("true"), Value::Boolean(true));
        assert_eq!(Value::infer("42"), Value::Integer(42));
        assert_eq!(Value::infer("-1.5"), Value::Decimal(-1.5));
        assert_eq!(Value::infer("inf"), Value::from("inf"));
        assert_eq!(Value::infer("1.2.3"), Value::from("1.2.3"));
        assert_eq!(Value::infer("hello"), Value::from("hello"));
    }

    #[test]
    fn yaml_keys_are_stringified() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("1: one\ntrue: yes").unwrap();
        let value = Value::from(yaml);

        assert_eq!(value.get("1"), Some(&Value::from("one")));
        assert_eq!(value.get("true"), Some(&Value::from("yes")));
    }

    #[test]
    fn lookup_walks_objects_and_arrays() {
        let json = serde_json::json!({"a": {"list": [{"id": 7}]}});
        let value = Value::from(json);

        assert_eq!(
            value.lookup(["a", "list", "0", "id"]),
            Some(&Value::Integer(7))
        );
        assert_eq!(value.lookup(["a", "missing"]), None);
    }

    #[test]
    fn display_matches_template_output() {
        let value = Value::from(serde_json::json!({"k": [1, "two"], "n": null}));
        assert_eq!(value.to_string(), "map[k:[1 two] n:]");
    }
}
