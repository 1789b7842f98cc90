use regex::Regex;
use serde_json::{Map, Number, Value};

use super::{Extraction, StatsGrammar};
use crate::core::TrackerError;

/// Percentage lines of the classic block, in the order they must appear
pub const CLASSIC_FIELDS: [&str; 5] = ["Health", "Sustenance", "Energy", "Hygiene", "Arousal"];

const META_MARKER: &str = "💎:";
const META_SEPARATOR: char = '|';

/// The fixed-layout block some providers emit instead of a fenced one:
///
/// ```text
/// User's Stats
/// ---
/// - Health: 80%
/// - Sustenance: 75%
/// - Energy: 60%
/// - Hygiene: 90%
/// - Arousal: 10%
/// 💎: Content | rested, warm
/// ```
///
/// Only ever updates the user entity.
pub struct ClassicGrammar {
    pattern: Regex,
}

impl ClassicGrammar {
    pub fn new(user_name: &str) -> Result<Self, TrackerError> {
        let mut pattern = format!(r"(?mi){}['’]s Stats\s*\n---[ \t]*\n", regex::escape(user_name.trim()));
        for field in CLASSIC_FIELDS {
            pattern.push_str(&format!(r"- {}:\s*([0-9]+)%[ \t]*\n", field));
        }
        pattern.push_str(&format!(r"{}[ \t]*([^\n]*)$", regex::escape(META_MARKER)));

        let pattern = Regex::new(&pattern)
            .map_err(|e| TrackerError::Config(format!("invalid classic stats pattern: {}", e)))?;
        Ok(ClassicGrammar { pattern })
    }
}

impl StatsGrammar for ClassicGrammar {
    fn name(&self) -> &'static str {
        "classic"
    }

    fn extract(&self, text: &str) -> Option<Extraction> {
        let text = text.replace("\r\n", "\n");
        let captures = self.pattern.captures(&text)?;

        let mut user = Map::new();
        for (i, field) in CLASSIC_FIELDS.iter().enumerate() {
            // digits only, so a failed parse is an overflow; the normalizer clamps it
            let value = captures.get(i + 1)?.as_str().parse::<u64>().unwrap_or(u64::MAX);
            user.insert(field.to_string(), Value::Number(Number::from(value)));
        }

        let meta = captures.get(CLASSIC_FIELDS.len() + 1).map_or("", |m| m.as_str());
        // only the first two segments count
        let mut segments = meta.split(META_SEPARATOR);
        let mood = segments.next().unwrap_or("").trim();
        let conditions = segments.next().unwrap_or("");
        if !mood.is_empty() {
            user.insert("Mood".to_string(), Value::String(mood.to_string()));
        }
        user.insert("Conditions".to_string(), Value::String(conditions.trim().to_string()));

        Some(Extraction {
            user: Some(Value::Object(user)),
            bot: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classic_text(name: &str, meta: &str) -> String {
        format!(
            "*She yawns.*\n\n{}'s Stats\n---\n- Health: 95%\n- Sustenance: 40%\n- Energy: 120%\n- Hygiene: 70%\n- Arousal: 5%\n💎: {}\n",
            name, meta
        )
    }

    #[test]
    fn test_classic_block() {
        let grammar = ClassicGrammar::new("User").unwrap();
        let found = grammar.extract(&classic_text("User", "Sleepy | tired, hungry")).unwrap();

        assert!(found.bot.is_none());
        assert_eq!(
            found.user,
            Some(json!({
                "Health": 95,
                "Sustenance": 40,
                "Energy": 120,
                "Hygiene": 70,
                "Arousal": 5,
                "Mood": "Sleepy",
                "Conditions": "tired, hungry"
            }))
        );
    }

    #[test]
    fn test_label_must_carry_user_name() {
        let grammar = ClassicGrammar::new("Mira").unwrap();
        assert!(grammar.extract(&classic_text("User", "Calm | none")).is_none());
        assert!(grammar.extract(&classic_text("mira", "Calm | none")).is_some());
    }

    #[test]
    fn test_name_is_escaped() {
        let grammar = ClassicGrammar::new("J.(R)").unwrap();
        assert!(grammar.extract(&classic_text("J.(R)", "Calm")).is_some());
        assert!(grammar.extract(&classic_text("JX(R)", "Calm")).is_none());
    }

    #[test]
    fn test_meta_without_conditions() {
        let grammar = ClassicGrammar::new("User").unwrap();
        let found = grammar.extract(&classic_text("User", "Bored")).unwrap();
        let user = found.user.unwrap();
        assert_eq!(user["Mood"], "Bored");
        assert_eq!(user["Conditions"], "");
    }

    #[test]
    fn test_extra_meta_segments_ignored() {
        let grammar = ClassicGrammar::new("User").unwrap();
        let found = grammar.extract(&classic_text("User", "Calm | tired, cold | ignored")).unwrap();
        let user = found.user.unwrap();
        assert_eq!(user["Mood"], "Calm");
        assert_eq!(user["Conditions"], "tired, cold");
    }

    #[test]
    fn test_oversized_percentage_still_matches() {
        let grammar = ClassicGrammar::new("User").unwrap();
        let text = classic_text("User", "Calm").replace("- Health: 95%", "- Health: 99999999999999999999%");
        let found = grammar.extract(&text).unwrap();

        let patch = crate::core::normalize(found.user.as_ref().unwrap());
        assert_eq!(patch.health, Some(100));
        assert_eq!(patch.sustenance, Some(40));
    }

    #[test]
    fn test_crlf_line_endings() {
        let grammar = ClassicGrammar::new("User").unwrap();
        let text = classic_text("User", "Ok | fine").replace('\n', "\r\n");
        assert!(grammar.extract(&text).is_some());
    }

    #[test]
    fn test_field_order_is_fixed() {
        let grammar = ClassicGrammar::new("User").unwrap();
        let text = "User's Stats\n---\n- Energy: 10%\n- Health: 10%\n- Sustenance: 10%\n- Hygiene: 10%\n- Arousal: 10%\n💎: x\n";
        assert!(grammar.extract(text).is_none());
    }
}
