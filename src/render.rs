use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::models::template::{RenderedContent, Template};

const DEFAULT_SUBJECT: &str = "Notification";
const DEFAULT_BODY: &str = "You have a new notification";

/// Substitutes `{{var}}` placeholders in the template's subject and body.
/// Strict: missing variables or non-scalar values are an error, so the
/// caller can fall back to [`fallback`] instead of shipping half-rendered
/// content.
pub fn render(
    template: &Template,
    variables: &HashMap<String, serde_json::Value>,
) -> Result<RenderedContent, DispatchError> {
    debug!(
        template_code = %template.code,
        variable_count = variables.len(),
        "Rendering template"
    );

    let subject = substitute(template.subject.as_deref().unwrap_or(DEFAULT_SUBJECT), variables)?;
    let body = substitute(&template.body, variables)?;

    Ok(RenderedContent { subject, body })
}

fn substitute(
    template: &str,
    variables: &HashMap<String, serde_json::Value>,
) -> Result<String, DispatchError> {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);

        let replacement = scalar_to_string(value).ok_or_else(|| {
            DispatchError::Validation(format!("unsupported variable type for key '{}'", key))
        })?;

        result = result.replace(&placeholder, &replacement);
    }

    if let Some(start) = result.find("{{") {
        if let Some(end) = result[start..].find("}}") {
            let missing_var = &result[start..start + end + 2];

            warn!(
                missing_variable = %missing_var,
                "Template contains unreplaced variable"
            );

            return Err(DispatchError::Validation(format!(
                "missing variable in template: {}",
                missing_var
            )));
        }
    }

    Ok(result)
}

/// Default rendering derived directly from the variable map, used whenever
/// template lookup or rendering fails. Never fails itself.
pub fn fallback(variables: &HashMap<String, serde_json::Value>) -> RenderedContent {
    let subject = variables
        .get("subject")
        .or_else(|| variables.get("title"))
        .and_then(scalar_to_string)
        .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());

    let body = variables
        .get("body")
        .or_else(|| variables.get("message"))
        .and_then(scalar_to_string)
        .unwrap_or_else(|| {
            if variables.is_empty() {
                DEFAULT_BODY.to_string()
            } else {
                serde_json::to_string(variables).unwrap_or_else(|_| DEFAULT_BODY.to_string())
            }
        });

    RenderedContent { subject, body }
}

fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Null => Some(String::new()),
        _ => None,
    }
}
