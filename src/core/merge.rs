use super::stats::{StatBlock, StatPatch};

/// Shallow, field-level, last-write-wins.
///
/// Fields present in `patch` overwrite `target`; absent fields are left
/// alone. Conditions are replaced wholesale.
pub fn merge(target: &mut StatBlock, patch: &StatPatch) {
    if let Some(v) = patch.health {
        target.health = v;
    }
    if let Some(v) = patch.sustenance {
        target.sustenance = v;
    }
    if let Some(v) = patch.energy {
        target.energy = v;
    }
    if let Some(v) = patch.hygiene {
        target.hygiene = v;
    }
    if let Some(v) = patch.arousal {
        target.arousal = v;
    }
    if let Some(v) = patch.genital_size {
        target.genital_size = v;
    }
    if let Some(v) = &patch.mood {
        target.mood = v.clone();
    }
    if let Some(v) = &patch.conditions {
        target.conditions = v.clone();
    }
    if let Some(v) = &patch.appearance {
        target.appearance = v.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::normalize::normalize;
    use serde_json::json;

    #[test]
    fn test_merge_preserves_untouched_fields() {
        let mut target = StatBlock::default();
        target.mood = "Grumpy".to_string();
        target.appearance = "Scarred knuckles".to_string();
        let before = target.clone();

        let patch = StatPatch { health: Some(12), ..Default::default() };
        merge(&mut target, &patch);

        assert_eq!(target.health, 12);
        assert_eq!(target.mood, before.mood);
        assert_eq!(target.appearance, before.appearance);
        assert_eq!(target.energy, before.energy);
        assert_eq!(target.conditions, before.conditions);
    }

    #[test]
    fn test_merge_replaces_conditions_wholesale() {
        let mut target = StatBlock::default();
        target.conditions = vec!["bruised".to_string(), "cold".to_string()];

        merge(&mut target, &normalize(&json!({"Conditions": ["sleepy"]})));
        assert_eq!(target.conditions, vec!["sleepy".to_string()]);
    }

    #[test]
    fn test_empty_patch_is_noop() {
        let mut target = StatBlock::default();
        target.arousal = 55;
        let before = target.clone();

        merge(&mut target, &StatPatch::default());
        assert_eq!(target, before);
    }
}
