//! Training-parameter generation for scalar metric models.
//!
//! Parameters come from exactly one of two sources: derived from summary
//! statistics over accumulated data, or supplied by the caller as a complete
//! bundle. The two are never mixed within one request.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ParamValidationError;
use crate::metric::MetricStats;

/// Default field names of the two-column scalar input schema.
pub const DEFAULT_TIMESTAMP_FIELD: &str = "c0";
pub const DEFAULT_VALUE_FIELD: &str = "c1";

/// Fallback value resolution when the stats carry none.
const DEFAULT_MIN_RESOLUTION: f64 = 0.001;

/// Bucket count used to derive the encoder resolution from the value range.
const VALUE_RESOLUTION_BUCKETS: f64 = 130.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Datetime,
    Float,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldRole {
    Timestamp,
    None,
}

/// One entry of the ordered input record schema.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub role: FieldRole,
}

/// Inference arguments handed to the model-execution subsystem.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InferenceArgs {
    pub predicted_field: String,
    pub prediction_steps: Vec<u32>,
}

/// The full training bundle embedded into `MetricRecord.model_params`.
/// `model_config` is opaque to this system and passed through to the
/// model-execution subsystem.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrainingParams {
    pub model_config: Value,
    pub inference_args: InferenceArgs,
    pub input_record_schema: Vec<FieldSpec>,
}

/// Caller-supplied model specification, as accepted from the REST surface.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete_model_params: Option<CompleteModelParams>,
}

/// A fully-specified parameter bundle inside a [ModelSpec].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteModelParams {
    pub model_params: Value,
    pub inference_args: Option<InferenceArgs>,
    pub timestamp_field_name: Option<String>,
    pub value_field_name: Option<String>,
}

fn scalar_input_schema(timestamp_field: &str, value_field: &str) -> Vec<FieldSpec> {
    vec![
        FieldSpec {
            name: timestamp_field.to_string(),
            kind: FieldKind::Datetime,
            role: FieldRole::Timestamp,
        },
        FieldSpec {
            name: value_field.to_string(),
            kind: FieldKind::Float,
            role: FieldRole::None,
        },
    ]
}

/// Derives training parameters from summary statistics.
///
/// Returns `None` when either bound is missing, meaning the metric does not
/// yet have enough data to characterize its value range.
pub fn params_from_stats(stats: &MetricStats) -> Option<TrainingParams> {
    let min = stats.min?;
    let max = stats.max?;

    let min_resolution = stats.min_resolution.unwrap_or(DEFAULT_MIN_RESOLUTION);
    let span = (max - min).abs();
    let resolution = (span / VALUE_RESOLUTION_BUCKETS).max(min_resolution);

    Some(TrainingParams {
        model_config: json!({
            "min": min,
            "max": max,
            "resolution": resolution,
        }),
        inference_args: InferenceArgs {
            predicted_field: DEFAULT_VALUE_FIELD.to_string(),
            prediction_steps: vec![1],
        },
        input_record_schema: scalar_input_schema(DEFAULT_TIMESTAMP_FIELD, DEFAULT_VALUE_FIELD),
    })
}

/// Builds training parameters from a caller-supplied complete bundle.
///
/// Returns `Ok(None)` when the spec carries no complete bundle. Validation
/// runs in a fixed order because later checks dereference fields the earlier
/// checks guarantee exist:
/// 1. `completeModelParams` and `modelParams` are mutually exclusive,
/// 2. `inferenceArgs`, `timestampFieldName` and `valueFieldName` must all be
///    present,
/// 3. the inference args' predicted field must equal `valueFieldName`.
pub fn params_from_complete_spec(
    spec: &ModelSpec,
) -> Result<Option<TrainingParams>, ParamValidationError> {
    let complete = match &spec.complete_model_params {
        Some(complete) => complete,
        None => return Ok(None),
    };

    if spec.model_params.is_some() {
        return Err(ParamValidationError::MutuallyExclusiveFields);
    }

    let inference_args = complete
        .inference_args
        .as_ref()
        .ok_or(ParamValidationError::MissingField("inferenceArgs"))?;
    let timestamp_field = complete
        .timestamp_field_name
        .as_deref()
        .ok_or(ParamValidationError::MissingField("timestampFieldName"))?;
    let value_field = complete
        .value_field_name
        .as_deref()
        .ok_or(ParamValidationError::MissingField("valueFieldName"))?;

    if inference_args.predicted_field != value_field {
        return Err(ParamValidationError::InconsistentFieldName);
    }

    Ok(Some(TrainingParams {
        model_config: complete.model_params.clone(),
        inference_args: inference_args.clone(),
        input_record_schema: scalar_input_schema(timestamp_field, value_field),
    }))
}
