//! Config value model for pool parameters.
//!
//! Pool targets arrive as raw TOML. They are converted into `Value`, where
//! any table carrying an `address` becomes a `Target` holding a shared
//! `TargetHandle`. Everything else keeps its shape so pool construction can
//! say exactly what it found instead of a target.

use crate::config::ConfigError;
use crate::load_balancer::{TargetDescriptor, TargetHandle};

/// A configuration value as seen by pool constructors.
#[derive(Debug, Clone)]
pub enum Value {
    Target(TargetHandle),
    List(Vec<Value>),
    Table(Vec<(String, Value)>),
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Datetime(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Target(_) => "target",
            Value::List(_) => "list",
            Value::Table(_) => "table",
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Boolean(_) => "boolean",
            Value::Datetime(_) => "datetime",
        }
    }

    /// Convert a raw TOML value.
    pub fn from_toml(raw: &toml::Value) -> Result<Self, ConfigError> {
        Ok(match raw {
            toml::Value::String(s) => Value::String(s.clone()),
            toml::Value::Integer(i) => Value::Integer(*i),
            toml::Value::Float(f) => Value::Float(*f),
            toml::Value::Boolean(b) => Value::Boolean(*b),
            toml::Value::Datetime(d) => Value::Datetime(d.to_string()),
            toml::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_toml).collect::<Result<_, _>>()?)
            }
            toml::Value::Table(table) => match table.get("address") {
                Some(address) => Value::Target(target_from_table(table, address)?),
                None => Value::Table(
                    table
                        .iter()
                        .map(|(k, v)| Ok((k.clone(), Value::from_toml(v)?)))
                        .collect::<Result<_, ConfigError>>()?,
                ),
            },
        })
    }
}

fn target_from_table(
    table: &toml::Table,
    address: &toml::Value,
) -> Result<TargetHandle, ConfigError> {
    let Some(address) = address.as_str() else {
        return Err(ConfigError::InvalidTarget {
            target: table_name(table).unwrap_or("<unnamed>").to_string(),
            reason: format!("address must be a string, got {}", address.type_str()),
        });
    };
    let name = table_name(table).unwrap_or(address);

    let descriptor =
        TargetDescriptor::parse(name, address).map_err(|reason| ConfigError::InvalidTarget {
            target: name.to_string(),
            reason,
        })?;
    Ok(TargetHandle::new(descriptor))
}

fn table_name(table: &toml::Table) -> Option<&str> {
    table.get("name").and_then(toml::Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Result<Value, ConfigError> {
        let doc: toml::Table = toml::from_str(src).unwrap();
        Value::from_toml(&doc["targets"])
    }

    #[test]
    fn test_single_target() {
        let value = parse(r#"targets = { name = "a", address = "http://10.0.0.1:80" }"#).unwrap();
        let Value::Target(handle) = value else {
            panic!("expected target");
        };
        assert_eq!(handle.name(), "a");
        assert_eq!(handle.address().port(), Some(80));
        assert_eq!(handle.holders(), 0);
    }

    #[test]
    fn test_name_defaults_to_address() {
        let value = parse(r#"targets = { address = "http://10.0.0.1:81" }"#).unwrap();
        let Value::Target(handle) = value else {
            panic!("expected target");
        };
        assert_eq!(handle.name(), "http://10.0.0.1:81");
    }

    #[test]
    fn test_mixed_list_keeps_shapes() {
        let value =
            parse(r#"targets = [{ address = "http://10.0.0.1:80" }, "b", 3, { weight = 2 }]"#)
                .unwrap();
        let Value::List(items) = value else {
            panic!("expected list");
        };
        let kinds: Vec<_> = items.iter().map(Value::type_name).collect();
        assert_eq!(kinds, vec!["target", "string", "integer", "table"]);
    }

    #[test]
    fn test_invalid_address() {
        let err = parse(r#"targets = { name = "a", address = "::nope::" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTarget { ref target, .. } if target == "a"));

        let err = parse(r#"targets = { name = "b", address = 8080 }"#).unwrap_err();
        assert!(err.to_string().contains("address must be a string, got integer"));
    }
}
