use serde_json::Value;

use super::fenced_body;

/// Pull a JSON object out of raw model output.
///
/// Strips a ```` ```json ```` fence if there is one, then keeps the span
/// from the first `{` to the last `}` so chatter around the object does
/// not matter. Returns `None` unless the result is a JSON object.
pub fn parse_generation_output(raw: &str) -> Option<Value> {
    let mut text = raw.trim();

    if let Some(body) = fenced_body(text, "json", false) {
        text = body.trim();
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            text = &text[start..=end];
        }
    }

    match serde_json::from_str::<Value>(text) {
        Ok(value) if value.is_object() => Some(value),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!("Generation output is not JSON: {}", e);
            None
        }
    }
}
