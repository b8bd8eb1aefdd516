//! Processor trait, argument schema and descriptors

use crate::context::Context;
use crate::error::ProcessorError;
use crate::frame::Frame;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Core processor trait - every processing unit implements this
#[async_trait]
pub trait Processor: Send + Sync {
    /// One-time initialization, run once per instance before the first `process`
    ///
    /// Expensive resources belong in `ctx.models`, keyed by class ref, so they
    /// outlive the instance.
    async fn init(&mut self, _ctx: &Context) -> Result<(), ProcessorError> {
        Ok(())
    }

    /// Inspect and/or mutate the frame's asset
    async fn process(&self, ctx: &Context, frame: &mut Frame<'_>) -> Result<(), ProcessorError>;

    /// Release whatever the instance holds; run once when the instance is retired
    async fn teardown(&self, _ctx: &Context) -> Result<(), ProcessorError> {
        Ok(())
    }
}

/// Reference to a processor as sent on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorRef {
    pub class_name: String,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub args: Map<String, Value>,

    /// Pipeline checksum recorded in `metrics.pipeline`
    #[serde(default)]
    pub checksum: i64,

    /// Run even when the asset already carries a clean metric for this checksum
    #[serde(default)]
    pub force: bool,
}

impl ProcessorRef {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            image: String::new(),
            args: Map::new(),
            checksum: 0,
            force: false,
        }
    }

    pub fn with_checksum(mut self, checksum: i64) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    /// Stable key of this reference; references with equal keys share an instance
    ///
    /// Argument order does not matter.
    pub fn instance_key(&self) -> String {
        let mut key = format!(
            "{}|{}|{}|{}|",
            self.class_name, self.image, self.checksum, self.force
        );
        write_sorted_object(&self.args, &mut key);
        key
    }

    pub fn with_arg(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.args.insert(name.to_string(), value.into());
        self
    }
}

fn write_sorted_object(map: &Map<String, Value>, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_sorted(&map[key], out);
    }
    out.push('}');
}

fn write_sorted(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_sorted_object(map, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_sorted(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

// ============================================================================
// Argument schema
// ============================================================================

/// Value type of a recognized argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Bool,
    Int,
    Float,
    String,
    StringList,
    List,
    Map,
}

impl ArgType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ArgType::Bool => value.is_boolean(),
            ArgType::Int => value.is_i64() || value.is_u64(),
            // integers are valid floats
            ArgType::Float => value.is_number(),
            ArgType::String => value.is_string(),
            ArgType::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            ArgType::List => value.is_array(),
            ArgType::Map => value.is_object(),
        }
    }
}

/// One recognized argument of a processor
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: &'static str,
    pub kind: ArgType,
    pub default: Option<Value>,
    pub required: bool,
}

impl Argument {
    /// Optional argument with a default value
    pub fn optional(name: &'static str, kind: ArgType, default: impl Into<Value>) -> Self {
        Self {
            name,
            kind,
            default: Some(default.into()),
            required: false,
        }
    }

    /// Argument the caller must supply
    pub fn required(name: &'static str, kind: ArgType) -> Self {
        Self {
            name,
            kind,
            default: None,
            required: true,
        }
    }
}

/// Validate raw arguments against a schema and merge in defaults
pub fn validate_args(schema: &[Argument], raw: &Map<String, Value>) -> Result<ProcessorArgs, ProcessorError> {
    if let Some(unknown) = raw.keys().find(|key| !schema.iter().any(|arg| arg.name == key.as_str())) {
        return Err(ProcessorError::Configuration(format!(
            "unrecognized argument '{unknown}'"
        )));
    }

    let mut values = Map::new();
    for arg in schema {
        match raw.get(arg.name).or(arg.default.as_ref()) {
            Some(value) if arg.kind.accepts(value) => {
                values.insert(arg.name.to_string(), value.clone());
            }
            Some(value) => {
                return Err(ProcessorError::Configuration(format!(
                    "argument '{}' expects {:?}, got {}",
                    arg.name, arg.kind, value
                )));
            }
            None if arg.required => {
                return Err(ProcessorError::Configuration(format!(
                    "missing required argument '{}'",
                    arg.name
                )));
            }
            None => {}
        }
    }
    Ok(ProcessorArgs(values))
}

/// Validated arguments with defaults applied
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessorArgs(Map<String, Value>);

impl ProcessorArgs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn bool(&self, name: &str) -> Result<bool, ProcessorError> {
        self.typed(name, Value::as_bool)
    }

    pub fn int(&self, name: &str) -> Result<i64, ProcessorError> {
        self.typed(name, Value::as_i64)
    }

    pub fn float(&self, name: &str) -> Result<f64, ProcessorError> {
        self.typed(name, Value::as_f64)
    }

    pub fn string(&self, name: &str) -> Result<String, ProcessorError> {
        self.typed(name, |value| value.as_str().map(String::from))
    }

    pub fn string_list(&self, name: &str) -> Result<Vec<String>, ProcessorError> {
        self.typed(name, |value| {
            value
                .as_array()?
                .iter()
                .map(|item| item.as_str().map(String::from))
                .collect()
        })
    }

    fn typed<T>(&self, name: &str, convert: impl FnOnce(&Value) -> Option<T>) -> Result<T, ProcessorError> {
        self.0
            .get(name)
            .and_then(convert)
            .ok_or_else(|| ProcessorError::Configuration(format!("argument '{name}' is not set")))
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// Builds a processor from validated arguments
pub type ProcessorFactory =
    Arc<dyn Fn(&ProcessorArgs) -> Result<Box<dyn Processor>, ProcessorError> + Send + Sync>;

/// Registry entry for one processor class
#[derive(Clone)]
pub struct ProcessorDescriptor {
    pub class_ref: String,
    pub args: Vec<Argument>,
    factory: ProcessorFactory,
}

impl ProcessorDescriptor {
    pub fn new<F>(class_ref: impl Into<String>, args: Vec<Argument>, factory: F) -> Self
    where
        F: Fn(&ProcessorArgs) -> Result<Box<dyn Processor>, ProcessorError> + Send + Sync + 'static,
    {
        Self {
            class_ref: class_ref.into(),
            args,
            factory: Arc::new(factory),
        }
    }

    /// Validate raw arguments and construct an instance
    pub fn instantiate(&self, raw: &Map<String, Value>) -> Result<Box<dyn Processor>, ProcessorError> {
        let args = validate_args(&self.args, raw)?;
        (self.factory)(&args)
    }
}

impl std::fmt::Debug for ProcessorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorDescriptor")
            .field("class_ref", &self.class_ref)
            .field("args", &self.args)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_ref_pipeline_fields() {
        let reference: ProcessorRef = serde_json::from_value(json!({
            "className": "pkg.ImageImporter",
            "checksum": 1234,
            "force": true
        }))
        .unwrap();
        assert_eq!(reference.checksum, 1234);
        assert!(reference.force);

        let plain: ProcessorRef =
            serde_json::from_value(json!({"className": "pkg.ImageImporter"})).unwrap();
        assert_eq!(plain, ProcessorRef::new("pkg.ImageImporter"));
    }

    #[test]
    fn test_instance_key_ignores_arg_order() {
        let a = ProcessorRef::new("pkg.X")
            .with_arg("size", 512)
            .with_arg("opts", json!({"b": 1, "a": [1, {"z": 0, "y": 1}]}));
        let b = ProcessorRef::new("pkg.X")
            .with_arg("opts", json!({"a": [1, {"y": 1, "z": 0}], "b": 1}))
            .with_arg("size", 512);
        assert_eq!(a.instance_key(), b.instance_key());
        assert_ne!(a.instance_key(), a.clone().with_checksum(7).instance_key());
        assert_ne!(a.instance_key(), a.clone().with_arg("size", 256).instance_key());
    }

    fn schema() -> Vec<Argument> {
        vec![
            Argument::optional("max_length_sec", ArgType::Float, 7200.0),
            Argument::optional("extract_extended_metadata", ArgType::Bool, false),
            Argument::optional("file_types", ArgType::StringList, json!([])),
            Argument::required("uri", ArgType::String),
        ]
    }

    fn raw(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_defaults_are_merged() {
        let args = validate_args(&schema(), &raw(json!({"uri": "s3://b/p"}))).unwrap();
        assert_eq!(args.float("max_length_sec").unwrap(), 7200.0);
        assert!(!args.bool("extract_extended_metadata").unwrap());
        assert_eq!(args.string("uri").unwrap(), "s3://b/p");
        assert!(args.string_list("file_types").unwrap().is_empty());
    }

    #[test]
    fn test_int_accepted_for_float() {
        let args = validate_args(&schema(), &raw(json!({"uri": "x", "max_length_sec": 60})))
            .unwrap();
        assert_eq!(args.float("max_length_sec").unwrap(), 60.0);
    }

    #[test]
    fn test_unknown_argument_rejected() {
        let err = validate_args(&schema(), &raw(json!({"uri": "x", "colour": "red"}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
        assert!(err.to_string().contains("colour"));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let err = validate_args(
            &schema(),
            &raw(json!({"uri": "x", "extract_extended_metadata": "yes"})),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);

        let err = validate_args(&schema(), &raw(json!({"uri": "x", "file_types": [1, 2]})))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
    }

    #[test]
    fn test_missing_required_rejected() {
        let err = validate_args(&schema(), &Map::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
        assert!(err.to_string().contains("uri"));
    }

    #[test]
    fn test_processor_ref_wire_shape() {
        let reference: ProcessorRef = serde_json::from_value(json!({
            "className": "pkg.ImageImporter",
            "args": {"extract_extended_metadata": true}
        }))
        .unwrap();
        assert_eq!(reference.class_name, "pkg.ImageImporter");
        assert_eq!(reference.image, "");
        assert_eq!(reference.args["extract_extended_metadata"], json!(true));

        let built = ProcessorRef::new("pkg.ImageImporter").with_arg("extract_extended_metadata", true);
        assert_eq!(built, reference);
    }
}
