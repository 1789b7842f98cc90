use serde_json::{Map, Number, Value};

use super::{fenced_body, strip_quotes, Extraction, StatsGrammar};
use crate::core::EntityKind;

/// A ```` ```stats ```` block with optional `user:` / `bot:` sections of
/// `Key: value` lines.
pub struct FencedGrammar;

impl StatsGrammar for FencedGrammar {
    fn name(&self) -> &'static str {
        "fenced"
    }

    fn extract(&self, text: &str) -> Option<Extraction> {
        fenced_body(text, "stats", true).map(parse_sections)
    }
}

/// Line-oriented, one level deep, no multi-line values.
pub fn parse_sections(body: &str) -> Extraction {
    let mut user: Option<Map<String, Value>> = None;
    let mut bot: Option<Map<String, Value>> = None;
    let mut current: Option<EntityKind> = None;

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (key, rest) = match line.split_once(':') {
            Some((key, rest)) => (key.trim(), rest.trim()),
            None => continue,
        };

        if let Some(kind) = section_header(key) {
            current = Some(kind);
            // a repeated header starts the section over
            let section = match kind {
                EntityKind::User => user.insert(Map::new()),
                EntityKind::Bot => bot.insert(Map::new()),
            };
            // "user: Health: 80" on one line
            if let Some((key, value)) = rest.split_once(':').map(|(k, v)| (k.trim(), v.trim())) {
                insert_pair(section, key, value);
            }
            continue;
        }

        let section = match current {
            Some(EntityKind::User) => user.as_mut(),
            Some(EntityKind::Bot) => bot.as_mut(),
            None => None,
        };
        if let Some(section) = section {
            insert_pair(section, key, rest);
        }
    }

    Extraction {
        user: user.map(Value::Object),
        bot: bot.map(Value::Object),
    }
}

fn section_header(key: &str) -> Option<EntityKind> {
    if key.eq_ignore_ascii_case("user") {
        Some(EntityKind::User)
    } else if key.eq_ignore_ascii_case("bot") {
        Some(EntityKind::Bot)
    } else {
        None
    }
}

fn insert_pair(section: &mut Map<String, Value>, key: &str, value: &str) {
    if key.is_empty() || value.is_empty() || !key.chars().all(|c| c.is_ascii_alphabetic()) {
        return;
    }
    section.insert(key.to_string(), parse_value(value));
}

/// `[a, "b"]` → list of strings, all digits → integer, anything else → string.
pub fn parse_value(value: &str) -> Value {
    if value.len() >= 2 && value.starts_with('[') && value.ends_with(']') {
        let items = value[1..value.len() - 1]
            .split(',')
            .map(|item| strip_quotes(item.trim()))
            .filter(|item| !item.is_empty())
            .map(|item| Value::String(item.to_string()))
            .collect();
        return Value::Array(items);
    }

    if value.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = value.parse::<u64>() {
            return Value::Number(Number::from(n));
        }
    }

    Value::String(strip_quotes(value).to_string())
}
