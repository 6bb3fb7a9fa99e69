use serde_json::Value;

use crate::db::models::NotificationTemplate;

/// Substitute `{{key}}` tokens in `template` with values from `data`.
///
/// Rendering happens inline in the send path, so it must never become its
/// own failure mode: missing and null keys render as the empty string,
/// unterminated `{{` openers are copied through verbatim, and everything
/// outside tokens passes through untouched.
pub fn render(template: &str, data: &Value) -> String {
    let mut result = String::with_capacity(template.len());
    let mut start = 0usize;

    while let Some(open_rel) = template[start..].find("{{") {
        let open = start + open_rel;
        if let Some(close_rel) = template[open + 2..].find("}}") {
            let close = open + 2 + close_rel;
            // append text before the opening braces
            result.push_str(&template[start..open]);
            let key = template[open + 2..close].trim();
            result.push_str(&placeholder_value(data, key));
            start = close + 2;
        } else {
            // no closing braces found; append rest and return
            result.push_str(&template[start..]);
            return result;
        }
    }

    result.push_str(&template[start..]);
    result
}

/// Render both parts of a stored template against the same data context.
pub fn render_template(template: &NotificationTemplate, data: &Value) -> (String, String) {
    (render(&template.subject, data), render(&template.body, data))
}

fn placeholder_value(data: &Value, key: &str) -> String {
    match data.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Null) | None => String::new(),
        // Nested structures render as compact JSON rather than being dropped.
        Some(other) => other.to_string(),
    }
}
