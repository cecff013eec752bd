//! Process input/output schemas and input validation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::errors::{RvError, RvResult};
use crate::validation_error;

/// Declared type of a process input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    String,
    Integer,
    Float,
    Boolean,
    /// A list of reals, given as a JSON array or a comma separated string.
    FloatList,
    /// Reference to an opaque blob (path or URL) handed to a collaborator.
    Reference,
}

/// One named input of a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    pub title: String,
    pub kind: InputKind,
    pub required: bool,
    pub default: Option<Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub allowed_values: Vec<String>,
    pub max_occurs: usize,
}

impl InputSpec {
    pub fn new(name: impl Into<String>, kind: InputKind) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
            kind,
            required: false,
            default: None,
            min: None,
            max: None,
            allowed_values: Vec::new(),
            max_occurs: 1,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, InputKind::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, InputKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, InputKind::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, InputKind::Boolean)
    }

    pub fn float_list(name: impl Into<String>) -> Self {
        Self::new(name, InputKind::FloatList)
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Self::new(name, InputKind::Reference)
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn at_least(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.allowed_values = values.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn max_occurs(mut self, n: usize) -> Self {
        self.max_occurs = n.max(1);
        self
    }

    fn check_range(&self, value: f64) -> RvResult<()> {
        if let Some(min) = self.min {
            if value < min {
                return Err(validation_error!(
                    "input {} value {value} is below the minimum {min}",
                    self.name
                ));
            }
        }
        if let Some(max) = self.max {
            if value > max {
                return Err(validation_error!(
                    "input {} value {value} is above the maximum {max}",
                    self.name
                ));
            }
        }
        Ok(())
    }

    /// Coerce one raw JSON occurrence into a typed value.
    fn coerce(&self, raw: &Value) -> RvResult<InputValue> {
        let mismatch = || validation_error!("input {} expects {:?}, got {raw}", self.name, self.kind);
        match self.kind {
            InputKind::String => {
                let s = raw.as_str().ok_or_else(mismatch)?;
                if self.allowed_values.is_empty() {
                    return Ok(InputValue::String(s.to_string()));
                }
                self.allowed_values
                    .iter()
                    .find(|allowed| allowed.eq_ignore_ascii_case(s))
                    .map(|allowed| InputValue::String(allowed.clone()))
                    .ok_or_else(|| {
                        validation_error!(
                            "input {} must be one of {:?}, got {s:?}",
                            self.name,
                            self.allowed_values
                        )
                    })
            }
            InputKind::Integer => {
                let value = match raw {
                    Value::Number(n) => n.as_i64().ok_or_else(mismatch)?,
                    Value::String(s) => s.trim().parse::<i64>().map_err(|_| mismatch())?,
                    _ => return Err(mismatch()),
                };
                self.check_range(value as f64)?;
                Ok(InputValue::Integer(value))
            }
            InputKind::Float => {
                let value = match raw {
                    Value::Number(n) => n.as_f64().ok_or_else(mismatch)?,
                    Value::String(s) => s.trim().parse::<f64>().map_err(|_| mismatch())?,
                    _ => return Err(mismatch()),
                };
                if !value.is_finite() {
                    return Err(mismatch());
                }
                self.check_range(value)?;
                Ok(InputValue::Float(value))
            }
            InputKind::Boolean => match raw {
                Value::Bool(b) => Ok(InputValue::Boolean(*b)),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Ok(InputValue::Boolean(true)),
                    "false" => Ok(InputValue::Boolean(false)),
                    _ => Err(mismatch()),
                },
                _ => Err(mismatch()),
            },
            InputKind::FloatList => {
                let values = match raw {
                    Value::Array(items) => items
                        .iter()
                        .map(|item| item.as_f64().ok_or_else(mismatch))
                        .collect::<RvResult<Vec<f64>>>()?,
                    Value::String(s) => parse_float_list(s).ok_or_else(mismatch)?,
                    _ => return Err(mismatch()),
                };
                if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
                    return Err(mismatch());
                }
                for v in &values {
                    self.check_range(*v)?;
                }
                Ok(InputValue::FloatList(values))
            }
            InputKind::Reference => match raw.as_str() {
                Some(s) if !s.trim().is_empty() => Ok(InputValue::Reference(s.trim().to_string())),
                _ => Err(mismatch()),
            },
        }
    }

    /// Split a raw value into its occurrences.
    fn occurrences<'a>(&self, raw: &'a Value) -> Vec<&'a Value> {
        match raw {
            Value::Array(items) if self.kind != InputKind::FloatList => items.iter().collect(),
            // A float list repeats when its elements are themselves lists.
            Value::Array(items)
                if items.first().is_some_and(|first| first.is_array() || first.is_string()) =>
            {
                items.iter().collect()
            }
            other => vec![other],
        }
    }
}

/// Parse `"0.529, -3.396, 407.29"` into reals.
pub fn parse_float_list(raw: &str) -> Option<Vec<f64>> {
    raw.split(',')
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<f64>().ok())
        .collect()
}

/// One named output of a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    pub title: String,
    pub mime_type: String,
}

impl OutputSpec {
    pub fn new(name: impl Into<String>, title: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Input and output schema of a process.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessSchema {
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
}

impl ProcessSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, spec: InputSpec) -> Self {
        self.inputs.push(spec);
        self
    }

    pub fn output(mut self, spec: OutputSpec) -> Self {
        self.outputs.push(spec);
        self
    }

    /// Validate raw JSON inputs, applying defaults and coercions.
    pub fn validate(&self, raw: &Map<String, Value>) -> RvResult<ProcessInputs> {
        if let Some(unknown) = raw
            .keys()
            .find(|key| !self.inputs.iter().any(|spec| &spec.name == *key))
        {
            return Err(validation_error!("unknown input {unknown}"));
        }

        let mut values = BTreeMap::new();
        for spec in &self.inputs {
            let provided = raw.get(&spec.name).filter(|v| !v.is_null());
            let source = match (provided, &spec.default) {
                (Some(value), _) => value,
                (None, Some(default)) => default,
                (None, None) if spec.required => {
                    return Err(validation_error!("missing required input {}", spec.name));
                }
                (None, None) => continue,
            };

            let occurrences = spec.occurrences(source);
            if occurrences.is_empty() {
                if spec.required {
                    return Err(validation_error!("missing required input {}", spec.name));
                }
                continue;
            }
            if occurrences.len() > spec.max_occurs {
                return Err(validation_error!(
                    "input {} accepts at most {} values, got {}",
                    spec.name,
                    spec.max_occurs,
                    occurrences.len()
                ));
            }
            let typed = occurrences
                .into_iter()
                .map(|raw| spec.coerce(raw))
                .collect::<RvResult<Vec<_>>>()?;
            values.insert(spec.name.clone(), typed);
        }

        Ok(ProcessInputs { values })
    }
}

/// A validated, typed input value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    FloatList(Vec<f64>),
    String(String),
    Reference(String),
}

/// Validated inputs of one job. Every input may occur several times.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessInputs {
    values: BTreeMap<String, Vec<InputValue>>,
}

impl ProcessInputs {
    pub fn get(&self, name: &str) -> Option<&InputValue> {
        self.values.get(name).and_then(|v| v.first())
    }

    pub fn all(&self, name: &str) -> &[InputValue] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    fn missing(name: &str) -> RvError {
        validation_error!("missing input {name}")
    }

    pub fn float(&self, name: &str) -> RvResult<f64> {
        match self.get(name) {
            Some(InputValue::Float(v)) => Ok(*v),
            Some(InputValue::Integer(v)) => Ok(*v as f64),
            Some(other) => Err(validation_error!("input {name} is not a number: {other:?}")),
            None => Err(Self::missing(name)),
        }
    }

    pub fn integer(&self, name: &str) -> RvResult<i64> {
        match self.get(name) {
            Some(InputValue::Integer(v)) => Ok(*v),
            Some(other) => Err(validation_error!("input {name} is not an integer: {other:?}")),
            None => Err(Self::missing(name)),
        }
    }

    pub fn boolean(&self, name: &str) -> RvResult<bool> {
        match self.get(name) {
            Some(InputValue::Boolean(v)) => Ok(*v),
            Some(other) => Err(validation_error!("input {name} is not a boolean: {other:?}")),
            None => Err(Self::missing(name)),
        }
    }

    pub fn string(&self, name: &str) -> RvResult<&str> {
        match self.get(name) {
            Some(InputValue::String(v)) | Some(InputValue::Reference(v)) => Ok(v),
            Some(other) => Err(validation_error!("input {name} is not a string: {other:?}")),
            None => Err(Self::missing(name)),
        }
    }

    pub fn float_list(&self, name: &str) -> RvResult<&[f64]> {
        match self.get(name) {
            Some(InputValue::FloatList(v)) => Ok(v),
            Some(other) => Err(validation_error!("input {name} is not a list of numbers: {other:?}")),
            None => Err(Self::missing(name)),
        }
    }

    /// Every occurrence of a float list input.
    pub fn float_lists(&self, name: &str) -> Vec<&[f64]> {
        self.all(name)
            .iter()
            .filter_map(|v| match v {
                InputValue::FloatList(list) => Some(list.as_slice()),
                _ => None,
            })
            .collect()
    }

    /// Every occurrence of a string or reference input.
    pub fn strings(&self, name: &str) -> Vec<&str> {
        self.all(name)
            .iter()
            .filter_map(|v| match v {
                InputValue::String(s) | InputValue::Reference(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Inputs rendered back to plain JSON, one key per input name.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (name, values) in &self.values {
            let rendered = if values.len() == 1 {
                serde_json::to_value(&values[0]).unwrap_or(Value::Null)
            } else {
                serde_json::to_value(values).unwrap_or(Value::Null)
            };
            map.insert(name.clone(), rendered);
        }
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calibration_schema() -> ProcessSchema {
        ProcessSchema::new()
            .input(InputSpec::reference("ts").required().max_occurs(4))
            .input(InputSpec::string("algorithm").one_of(&["DDS"]).with_default(json!("DDS")))
            .input(InputSpec::integer("MaxEvals").range(1.0, 100_000.0).with_default(json!(50)))
            .input(InputSpec::float_list("params").required())
            .input(InputSpec::float("area").at_least(0.0))
            .input(InputSpec::boolean("categorical").with_default(json!(false)))
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn applies_defaults_and_coercions() {
        let inputs = calibration_schema()
            .validate(&object(json!({
                "ts": "file:///data/salmon.nc",
                "params": "0.529, -3.396, 407.29",
                "area": "4250.6",
                "algorithm": "dds",
            })))
            .unwrap();

        assert_eq!(inputs.string("ts").unwrap(), "file:///data/salmon.nc");
        assert_eq!(inputs.float_list("params").unwrap(), &[0.529, -3.396, 407.29]);
        assert_eq!(inputs.float("area").unwrap(), 4250.6);
        assert_eq!(inputs.integer("MaxEvals").unwrap(), 50);
        assert_eq!(inputs.string("algorithm").unwrap(), "DDS");
        assert!(!inputs.boolean("categorical").unwrap());
    }

    #[test]
    fn rejects_missing_required() {
        let err = calibration_schema()
            .validate(&object(json!({"ts": "a.nc"})))
            .unwrap_err();
        assert!(matches!(err, RvError::InvalidInput(ref m) if m.contains("params")));
    }

    #[test]
    fn rejects_type_mismatch() {
        let err = calibration_schema()
            .validate(&object(json!({"ts": "a.nc", "params": [1.0], "MaxEvals": "many"})))
            .unwrap_err();
        assert!(matches!(err, RvError::InvalidInput(_)));

        let err = calibration_schema()
            .validate(&object(json!({"ts": "a.nc", "params": [1.0, "x"]})))
            .unwrap_err();
        assert!(matches!(err, RvError::InvalidInput(_)));
    }

    #[test]
    fn rejects_out_of_bounds() {
        let err = calibration_schema()
            .validate(&object(json!({"ts": "a.nc", "params": [1.0], "MaxEvals": 0})))
            .unwrap_err();
        assert!(matches!(err, RvError::InvalidInput(ref m) if m.contains("minimum")));

        let err = calibration_schema()
            .validate(&object(json!({"ts": "a.nc", "params": [1.0], "area": -1.0})))
            .unwrap_err();
        assert!(matches!(err, RvError::InvalidInput(_)));
    }

    #[test]
    fn rejects_unknown_inputs_and_values() {
        let err = calibration_schema()
            .validate(&object(json!({"ts": "a.nc", "params": [1.0], "colour": "red"})))
            .unwrap_err();
        assert!(matches!(err, RvError::InvalidInput(ref m) if m.contains("colour")));

        let err = calibration_schema()
            .validate(&object(json!({"ts": "a.nc", "params": [1.0], "algorithm": "SCE"})))
            .unwrap_err();
        assert!(matches!(err, RvError::InvalidInput(_)));
    }

    #[test]
    fn repeated_inputs() {
        let inputs = ProcessSchema::new()
            .input(InputSpec::float_list("params").required().max_occurs(3))
            .input(InputSpec::reference("ts").required().max_occurs(2))
            .validate(&object(json!({
                "params": ["1.03, 0.046", "1.05, 0.0468", [0.98, 0.04]],
                "ts": ["a.nc", "b.nc"],
            })))
            .unwrap();

        assert_eq!(inputs.float_lists("params").len(), 3);
        assert_eq!(inputs.float_lists("params")[2], &[0.98, 0.04]);
        assert_eq!(inputs.strings("ts"), vec!["a.nc", "b.nc"]);
    }

    #[test]
    fn too_many_occurrences() {
        let err = ProcessSchema::new()
            .input(InputSpec::float_list("params").required().max_occurs(2))
            .validate(&object(json!({"params": [[1.0], [2.0], [3.0]]})))
            .unwrap_err();
        assert!(matches!(err, RvError::InvalidInput(ref m) if m.contains("at most")));
    }

    #[test]
    fn float_list_parsing() {
        assert_eq!(parse_float_list("0.1, -5.0,100"), Some(vec![0.1, -5.0, 100.0]));
        assert_eq!(parse_float_list("0.1, abc"), None);
    }

    #[test]
    fn inputs_render_to_json() {
        let inputs = calibration_schema()
            .validate(&object(json!({"ts": "a.nc", "params": [1.0, 2.0]})))
            .unwrap();
        let rendered = inputs.to_json();
        assert_eq!(rendered["params"], json!([1.0, 2.0]));
        assert_eq!(rendered["MaxEvals"], json!(50));
    }
}
