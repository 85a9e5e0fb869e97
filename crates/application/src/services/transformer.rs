//! Payload transformer
//!
//! Pure mapping from an event payload to one or more delivery plans. Three
//! modes: passthrough, declarative path-to-path template, and action lists
//! where every action becomes an independent delivery. Identical inputs
//! always produce identical plans.

use domain::entities::{DeliveryAction, FieldMapping, HttpMethod, Integration, TransformSpec};
use serde_json::Value;

use crate::error::ApplicationError;

/// One outbound delivery produced by the transformer
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryPlan {
    /// Action name, for action-list integrations
    pub action_name: Option<String>,
    /// Target URL
    pub url: String,
    /// HTTP method
    pub method: HttpMethod,
    /// Request body
    pub body: Value,
}

/// Maps event payloads to delivery plans
#[derive(Debug, Clone, Copy, Default)]
pub struct Transformer;

impl Transformer {
    /// Create a transformer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Produce the delivery plans for one integration and payload
    ///
    /// Failures are business-logic failures: category `TRANSFORMATION`,
    /// never retried, never counted by the circuit breaker.
    pub fn transform(
        &self,
        integration: &Integration,
        payload: &Value,
    ) -> Result<Vec<DeliveryPlan>, ApplicationError> {
        match &integration.transform {
            TransformSpec::Simple => Ok(vec![DeliveryPlan {
                action_name: None,
                url: integration.target_url.clone(),
                method: integration.method,
                body: payload.clone(),
            }]),
            TransformSpec::Template { mapping } => {
                let body = apply_mapping(payload, mapping)?;
                Ok(vec![DeliveryPlan {
                    action_name: None,
                    url: integration.target_url.clone(),
                    method: integration.method,
                    body,
                }])
            },
            TransformSpec::ActionList { actions } => {
                if actions.is_empty() {
                    return Err(ApplicationError::Transformation(
                        "action list is empty".to_string(),
                    ));
                }
                actions
                    .iter()
                    .map(|action| self.plan_for_action(integration, action, payload))
                    .collect()
            },
        }
    }

    fn plan_for_action(
        &self,
        integration: &Integration,
        action: &DeliveryAction,
        payload: &Value,
    ) -> Result<DeliveryPlan, ApplicationError> {
        let body = match &action.mapping {
            Some(mapping) => apply_mapping(payload, mapping)?,
            None => payload.clone(),
        };
        Ok(DeliveryPlan {
            action_name: Some(action.name.clone()),
            url: action
                .target_url
                .clone()
                .unwrap_or_else(|| integration.target_url.clone()),
            method: action.method.unwrap_or(integration.method),
            body,
        })
    }
}

/// Apply a declarative path mapping to a payload
///
/// Source paths that are absent in the payload are skipped; a non-object
/// payload cannot be mapped and is a transformation failure.
fn apply_mapping(payload: &Value, mapping: &[FieldMapping]) -> Result<Value, ApplicationError> {
    if !payload.is_object() {
        return Err(ApplicationError::Transformation(format!(
            "template transform requires an object payload, got {}",
            json_kind(payload)
        )));
    }

    let mut body = Value::Object(serde_json::Map::new());
    for rule in mapping {
        if let Some(value) = get_path(payload, &rule.source) {
            set_path(&mut body, &rule.target, value.clone())?;
        }
    }
    Ok(body)
}

/// Read a dotted path out of a JSON value
fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Write a dotted path into a JSON object, creating intermediate objects
fn set_path(target: &mut Value, path: &str, value: Value) -> Result<(), ApplicationError> {
    let mut current = target;
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| ApplicationError::Transformation("empty target path".to_string()))?;

    for segment in parents {
        let object = current.as_object_mut().ok_or_else(|| {
            ApplicationError::Transformation(format!(
                "target path {path} collides with a non-object value"
            ))
        })?;
        current = object
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }

    let object = current.as_object_mut().ok_or_else(|| {
        ApplicationError::Transformation(format!(
            "target path {path} collides with a non-object value"
        ))
    })?;
    object.insert((*last).to_string(), value);
    Ok(())
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
