use serde::{Deserialize, Serialize};

pub const DEFAULT_MOOD: &str = "Neutral";
pub const DEFAULT_APPEARANCE: &str = "No data yet.";
pub const NO_CONDITIONS: &str = "none";

/// The two tracked participants of a chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Bot,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::User, EntityKind::Bot];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Bot => "bot",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = super::TrackerError;

    fn from_str(s: &str) -> super::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "user" | "persona" => Ok(EntityKind::User),
            "bot" | "char" | "character" => Ok(EntityKind::Bot),
            _ => Err(super::TrackerError::InvalidInput(format!(
                "unknown entity '{}', expected user or bot",
                s
            ))),
        }
    }
}

/// Canonical validated stats for one entity.
///
/// Every field satisfies its constraint at all times; values only ever
/// arrive through [`crate::core::normalize`] or a full replace from a
/// preset/default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StatBlock {
    pub health: u8,
    pub sustenance: u8,
    pub energy: u8,
    pub hygiene: u8,
    pub arousal: u8,
    /// Centimeters, one decimal; treated as a physical constant by the prompt
    pub genital_size: f64,
    pub mood: String,
    pub conditions: Vec<String>,
    pub appearance: String,
}

impl Default for StatBlock {
    fn default() -> Self {
        StatBlock {
            health: 80,
            sustenance: 80,
            energy: 80,
            hygiene: 80,
            arousal: 0,
            genital_size: 0.0,
            mood: DEFAULT_MOOD.to_string(),
            conditions: vec![NO_CONDITIONS.to_string()],
            appearance: DEFAULT_APPEARANCE.to_string(),
        }
    }
}

impl StatBlock {
    /// Build a block from a loosely-typed object, defaulting whatever is
    /// missing or unusable.
    pub fn from_raw(raw: &serde_json::Value) -> StatBlock {
        let mut block = StatBlock::default();
        // empty text fields normalize to "absent", so the defaults stay
        super::merge::merge(&mut block, &super::normalize::normalize(raw));
        block
    }

    /// Re-validate every field, e.g. after loading a hand-edited snapshot.
    pub fn repaired(&self) -> StatBlock {
        let raw = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        StatBlock::from_raw(&raw)
    }
}

/// A partial StatBlock. Only produced by the normalizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sustenance: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hygiene: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arousal: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genital_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appearance: Option<String>,
}

impl StatPatch {
    pub fn is_empty(&self) -> bool {
        *self == StatPatch::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_block() {
        let block = StatBlock::default();
        assert_eq!(block.health, 80);
        assert_eq!(block.arousal, 0);
        assert_eq!(block.mood, "Neutral");
        assert_eq!(block.conditions, vec!["none".to_string()]);
        assert_eq!(block.appearance, "No data yet.");
    }

    #[test]
    fn test_block_uses_pascal_case_keys() {
        let json = serde_json::to_value(StatBlock::default()).unwrap();
        assert_eq!(json["Health"], 80);
        assert_eq!(json["GenitalSize"], 0.0);
        assert!(json.get("health").is_none());
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let block: StatBlock = serde_json::from_str(r#"{"Health": 12, "Mood": "Calm"}"#).unwrap();
        assert_eq!(block.health, 12);
        assert_eq!(block.mood, "Calm");
        assert_eq!(block.energy, 80);
        assert_eq!(block.appearance, "No data yet.");
    }

    #[test]
    fn test_repaired_fixes_invalid_text() {
        let mut block = StatBlock::default();
        block.mood = "   ".to_string();
        block.conditions = vec![];
        block.genital_size = 12.34;

        let repaired = block.repaired();
        assert_eq!(repaired.mood, "Neutral");
        assert_eq!(repaired.conditions, vec!["none".to_string()]);
        assert_eq!(repaired.genital_size, 12.3);
    }

    #[test]
    fn test_from_raw_clamps_and_defaults() {
        let raw = serde_json::json!({"Health": -5, "Energy": "250", "Conditions": "tired"});
        let block = StatBlock::from_raw(&raw);
        assert_eq!(block.health, 0);
        assert_eq!(block.energy, 100);
        assert_eq!(block.sustenance, 80);
        assert_eq!(block.conditions, vec!["tired".to_string()]);
    }

    #[test]
    fn test_entity_kind_parse() {
        assert_eq!("User".parse::<EntityKind>().unwrap(), EntityKind::User);
        assert_eq!("character".parse::<EntityKind>().unwrap(), EntityKind::Bot);
        assert!("npc".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_empty_patch() {
        assert!(StatPatch::default().is_empty());
        let patch = StatPatch { health: Some(1), ..Default::default() };
        assert!(!patch.is_empty());
    }
}
