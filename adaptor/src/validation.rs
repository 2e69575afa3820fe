//! JSON Schema checks for the init and run payloads.

use std::sync::OnceLock;

use jsonschema::Draft;
use jsonschema::JSONSchema;
use serde_json::Value;

use crate::error::AdaptorError;
use crate::error::Result;

const INIT_DATA_SCHEMA: &str = include_str!("../schemas/init_data.schema.json");
const RUN_DATA_SCHEMA: &str = include_str!("../schemas/run_data.schema.json");

const INIT_DATA: &str = "init data";
const RUN_DATA: &str = "run data";

struct SchemaValidator {
    kind: &'static str,
    schema: JSONSchema,
}

impl SchemaValidator {
    fn compile(kind: &'static str, source: &str) -> std::result::Result<Self, String> {
        let document: Value = serde_json::from_str(source).map_err(|err| err.to_string())?;
        let schema = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&document)
            .map_err(|err| err.to_string())?;
        Ok(Self { kind, schema })
    }

    fn validate(&self, instance: &Value) -> Result<()> {
        self.schema.validate(instance).map_err(|errors| {
            let errors = errors
                .map(|err| {
                    format!(
                        "Property '{}': {}",
                        err.instance_path,
                        err.to_string().replace('\n', " ")
                    )
                })
                .collect();
            AdaptorError::Validation {
                kind: self.kind,
                errors,
            }
        })
    }
}

struct AdaptorDataValidators {
    init_data: SchemaValidator,
    run_data: SchemaValidator,
}

fn validators() -> Result<&'static AdaptorDataValidators> {
    static VALIDATORS: OnceLock<std::result::Result<AdaptorDataValidators, (&str, String)>> =
        OnceLock::new();
    let compiled = VALIDATORS.get_or_init(|| {
        Ok(AdaptorDataValidators {
            init_data: SchemaValidator::compile(INIT_DATA, INIT_DATA_SCHEMA)
                .map_err(|reason| (INIT_DATA, reason))?,
            run_data: SchemaValidator::compile(RUN_DATA, RUN_DATA_SCHEMA)
                .map_err(|reason| (RUN_DATA, reason))?,
        })
    });
    compiled
        .as_ref()
        .map_err(|(kind, reason)| AdaptorError::InvalidSchema {
            kind: *kind,
            reason: reason.clone(),
        })
}

pub fn validate_init_data(init_data: &Value) -> Result<()> {
    validators()?.init_data.validate(init_data)
}

pub fn validate_run_data(run_data: &Value) -> Result<()> {
    validators()?.run_data.validate(run_data)
}

/// Turns a textual integer `frame` (`"12"`) or a whole float (`12.0`) into a
/// JSON integer so that it passes validation and reaches the client as an
/// integer. Anything else is left for the schema to judge.
pub fn coerce_run_data(mut run_data: Value) -> Value {
    let parsed = match run_data.get("frame") {
        Some(Value::String(text)) => text.trim().parse::<i64>().ok(),
        Some(Value::Number(number)) if number.is_f64() => number.as_f64().and_then(whole_i64),
        _ => None,
    };
    if let (Some(number), Some(frame)) = (parsed, run_data.get_mut("frame")) {
        *frame = Value::from(number);
    }
    run_data
}

fn whole_i64(value: f64) -> Option<i64> {
    // i64::MAX is not representable as f64; its nearest neighbour is 2^63.
    let in_range = value >= i64::MIN as f64 && value < i64::MAX as f64;
    (value.fract() == 0.0 && in_range).then_some(value as i64)
}
