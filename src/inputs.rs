//! Named circuit inputs in emission order.
//!
//! Every number is written as a JSON string of decimal digits, which is how
//! circom input files carry values wider than 53 bits.

use num_bigint::BigUint;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::Result;

/// Field written into an artifact that would otherwise be empty.
pub const PLACEHOLDER_KEY: &str = "_placeholder";
pub const PLACEHOLDER_VALUE: &str = "empty file";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircuitInputs {
    signals: Map<String, Value>,
}

impl CircuitInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_input(self, name: &str, bytes: &[u8]) -> Self {
        self.value_input(name, decimal_array(bytes))
    }

    pub fn limbs_input(self, name: &str, limbs: &[BigUint]) -> Self {
        self.value_input(name, decimal_array(limbs))
    }

    pub fn biguint_input(self, name: &str, value: &BigUint) -> Self {
        self.value_input(name, Value::String(value.to_string()))
    }

    pub fn usize_input(self, name: &str, value: usize) -> Self {
        self.value_input(name, Value::String(value.to_string()))
    }

    /// A string value, emitted as is.
    pub fn str_input(self, name: &str, value: &str) -> Self {
        self.value_input(name, Value::String(value.to_string()))
    }

    pub fn value_input(mut self, name: &str, value: Value) -> Self {
        if self.signals.insert(name.to_string(), value).is_some() {
            warn!(input = name, "circuit input assigned twice, keeping the last value");
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.signals.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.signals.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.signals.keys().map(String::as_str)
    }

    /// JSON object of all inputs. An empty set renders as
    /// `{"_placeholder": "empty file"}` so the artifact always exists with content.
    pub fn to_json(&self) -> Value {
        if self.signals.is_empty() {
            let mut placeholder = Map::new();
            placeholder.insert(PLACEHOLDER_KEY.into(), Value::from(PLACEHOLDER_VALUE));
            return Value::Object(placeholder);
        }
        Value::Object(self.signals.clone())
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_json())?)
    }
}

/// JSON array of decimal strings.
pub fn decimal_array<T: ToString>(values: &[T]) -> Value {
    Value::Array(
        values
            .iter()
            .map(|value| Value::String(value.to_string()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_are_decimal_strings_in_insertion_order() {
        let inputs = CircuitInputs::new()
            .bytes_input("message", &[101, 121, 0])
            .limbs_input("modulus", &[BigUint::from(5u8), BigUint::from(1u64) << 100usize])
            .usize_input("period_idx", 36)
            .value_input("list", decimal_array(&[-1i128, 2]));

        assert_eq!(
            inputs.to_json(),
            json!({
                "message": ["101", "121", "0"],
                "modulus": ["5", "1267650600228229401496703205376"],
                "period_idx": "36",
                "list": ["-1", "2"]
            })
        );
        let names: Vec<&str> = inputs.names().collect();
        assert_eq!(names, ["message", "modulus", "period_idx", "list"]);
    }

    #[test]
    fn empty_inputs_render_placeholder() {
        let inputs = CircuitInputs::new();
        assert!(inputs.is_empty());
        assert_eq!(inputs.to_json(), json!({ "_placeholder": "empty file" }));
    }

    #[test]
    fn later_assignment_wins() {
        let inputs = CircuitInputs::new()
            .usize_input("x", 1)
            .usize_input("x", 2);
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs.get("x"), Some(&json!("2")));
    }
}
