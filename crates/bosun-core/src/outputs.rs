use crate::CoreError;
use serde_json::Value;
use std::collections::BTreeMap;

/// Typed read access to the applier outputs recorded in state.
#[derive(Debug, Clone, Copy)]
pub struct Outputs<'a> {
    map: &'a BTreeMap<String, Value>,
}

impl<'a> Outputs<'a> {
    pub fn new(map: &'a BTreeMap<String, Value>) -> Self {
        Self { map }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        match self.map.get(name)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => Some(
                items
                    .iter()
                    .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_owned))
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            other => Some(other.to_string()),
        }
    }

    pub fn require(&self, name: &str) -> Result<String, CoreError> {
        self.get(name)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CoreError::MissingOutput {
                name: name.to_owned(),
            })
    }

    /// A list output. Older applier versions flatten lists to comma-joined strings.
    pub fn list(&self, name: &str) -> Result<Vec<String>, CoreError> {
        let missing = || CoreError::MissingOutput {
            name: name.to_owned(),
        };
        match self.map.get(name).ok_or_else(missing)? {
            Value::Array(items) => Ok(items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()),
            Value::String(s) if !s.is_empty() => {
                Ok(s.split(',').map(|p| p.trim().to_owned()).collect())
            }
            _ => Err(missing()),
        }
    }

    /// First name in `required` that is absent or empty.
    pub fn first_missing<'n>(&self, required: &[&'n str]) -> Option<&'n str> {
        required
            .iter()
            .copied()
            .find(|name| self.get(name).is_none_or(|v| v.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map() -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("external_ip".to_owned(), json!("203.0.113.10")),
            ("subnet_ids".to_owned(), json!(["subnet-a", "subnet-b"])),
            ("legacy_cidrs".to_owned(), json!("10.0.16.0/20, 10.0.32.0/20")),
            ("empty".to_owned(), json!("")),
        ])
    }

    #[test]
    fn require_reads_strings_and_rejects_absent() {
        let m = map();
        let outputs = Outputs::new(&m);
        assert_eq!(outputs.require("external_ip").unwrap(), "203.0.113.10");
        assert!(matches!(
            outputs.require("network_name"),
            Err(CoreError::MissingOutput { name }) if name == "network_name"
        ));
        assert!(outputs.require("empty").is_err());
    }

    #[test]
    fn lists_accept_arrays_and_joined_strings() {
        let m = map();
        let outputs = Outputs::new(&m);
        assert_eq!(outputs.list("subnet_ids").unwrap(), ["subnet-a", "subnet-b"]);
        assert_eq!(
            outputs.list("legacy_cidrs").unwrap(),
            ["10.0.16.0/20", "10.0.32.0/20"]
        );
        assert_eq!(outputs.get("subnet_ids").unwrap(), "subnet-a,subnet-b");
    }

    #[test]
    fn first_missing_names_the_gap() {
        let m = map();
        let outputs = Outputs::new(&m);
        assert_eq!(outputs.first_missing(&["external_ip", "empty", "x"]), Some("empty"));
        assert_eq!(outputs.first_missing(&["external_ip"]), None);
    }
}
