use serde_json::{Map, Value};

use super::stats::{StatPatch, DEFAULT_APPEARANCE, NO_CONDITIONS};

pub const MAX_MOOD_CHARS: usize = 60;
pub const MAX_CONDITIONS: usize = 3;
pub const MAX_APPEARANCE_CHARS: usize = 220;

/// Longest trailing fragment that is dropped when truncating free text
const PARTIAL_WORD_CHARS: usize = 12;
const ELLIPSIS: char = '…';

/// Turn a loosely-typed object into a stat patch.
///
/// Each field is handled on its own. Missing or non-coercible values are
/// left out of the patch instead of being defaulted, so the caller keeps
/// whatever it already had. Anything that is not an object yields an
/// empty patch.
pub fn normalize(raw: &Value) -> StatPatch {
    let Some(obj) = raw.as_object() else {
        return StatPatch::default();
    };

    StatPatch {
        health: field(obj, "Health").and_then(percent),
        sustenance: field(obj, "Sustenance").and_then(percent),
        energy: field(obj, "Energy").and_then(percent),
        hygiene: field(obj, "Hygiene").and_then(percent),
        arousal: field(obj, "Arousal").and_then(percent),
        genital_size: field(obj, "GenitalSize").and_then(centimeters),
        mood: field(obj, "Mood").and_then(mood),
        conditions: field(obj, "Conditions").and_then(conditions),
        appearance: field(obj, "Appearance").and_then(appearance),
    }
}

/// Exact key first, then a case-insensitive match ("genitalSize", "health").
fn field<'a>(obj: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    obj.get(name)
        .or_else(|| {
            obj.iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
        .filter(|value| !value.is_null())
}

fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            s.strip_suffix('%').unwrap_or(s).trim_end().parse::<f64>().ok()?
        }
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn percent(value: &Value) -> Option<u8> {
    coerce_number(value).map(|n| n.round().clamp(0.0, 100.0) as u8)
}

fn centimeters(value: &Value) -> Option<f64> {
    coerce_number(value).map(|n| {
        let rounded = ((n * 10.0).round() / 10.0).clamp(0.0, 100.0);
        // no negative zero
        rounded + 0.0
    })
}

fn mood(value: &Value) -> Option<String> {
    let text = stringify(value)?;
    let capped: String = text.trim().chars().take(MAX_MOOD_CHARS).collect();
    let capped = capped.trim_end();
    (!capped.is_empty()).then(|| capped.to_string())
}

fn conditions(value: &Value) -> Option<Vec<String>> {
    let entries: Vec<String> = match value {
        Value::String(s) => s.split([',', '\n']).map(str::to_string).collect(),
        Value::Array(items) => items.iter().filter_map(stringify).collect(),
        _ => Vec::new(),
    };

    let kept: Vec<String> = entries
        .iter()
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .take(MAX_CONDITIONS)
        .map(str::to_string)
        .collect();

    if kept.is_empty() {
        Some(vec![NO_CONDITIONS.to_string()])
    } else {
        Some(kept)
    }
}

fn appearance(value: &Value) -> Option<String> {
    let text = match value {
        Value::Array(items) => items.iter().filter_map(stringify).collect::<Vec<_>>().join(", "),
        other => stringify(other)?,
    };
    Some(clamp_text_to_box(&text, MAX_APPEARANCE_CHARS))
}

/// Compact free text so it fits a small read-only box.
///
/// Trims every line, collapses horizontal whitespace runs to one space,
/// keeps at most one blank line between blocks and cuts to `max_chars`
/// (ellipsis included), backing off a trailing fragment of up to twelve
/// characters so the cut lands between words.
pub fn clamp_text_to_box(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return DEFAULT_APPEARANCE.to_string();
    }

    let mut lines: Vec<String> = Vec::new();
    for line in trimmed.lines() {
        let line = collapse_horizontal(line.trim());
        if line.is_empty() && lines.last().map_or(true, |prev| prev.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    let mut out = lines.join("\n");

    if out.chars().count() > max_chars {
        let keep = max_chars.saturating_sub(1);
        let cut: String = out.chars().take(keep).collect();
        let cut = cut.trim_end();
        let shortened = drop_partial_word(cut);
        let mut truncated = if shortened.is_empty() { cut } else { shortened }.to_string();
        truncated.push(ELLIPSIS);
        out = truncated;
    }

    out
}

fn collapse_horizontal(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_gap = false;
    for c in line.chars() {
        if c.is_whitespace() {
            if !in_gap {
                out.push(' ');
            }
            in_gap = true;
        } else {
            out.push(c);
            in_gap = false;
        }
    }
    out
}

fn drop_partial_word(text: &str) -> &str {
    let Some((idx, ws)) = text.char_indices().rev().find(|(_, c)| c.is_whitespace()) else {
        return text;
    };
    let tail = &text[idx + ws.len_utf8()..];
    if tail.chars().count() > PARTIAL_WORD_CHARS {
        return text;
    }
    text[..idx].trim_end()
}
