//! Extraction of stats payloads from free-form chat text.
//!
//! Grammars are tried in a fixed priority order and the first match wins.
//! Not finding anything is the normal case, so every grammar reports a
//! miss as `None` rather than an error.

pub mod classic;
pub mod fenced;
pub mod json;

use serde_json::Value;

use crate::core::EntityKind;

pub use classic::ClassicGrammar;
pub use fenced::FencedGrammar;
pub use json::parse_generation_output;

const FENCE: &str = "```";

/// Loosely-typed per-entity key/value trees found in a message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub user: Option<Value>,
    pub bot: Option<Value>,
}

impl Extraction {
    pub fn section(&self, kind: EntityKind) -> Option<&Value> {
        match kind {
            EntityKind::User => self.user.as_ref(),
            EntityKind::Bot => self.bot.as_ref(),
        }
    }
}

/// One way of recognizing a stats payload
pub trait StatsGrammar: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, text: &str) -> Option<Extraction>;
}

/// Grammars in priority order
pub struct GrammarSet {
    grammars: Vec<Box<dyn StatsGrammar>>,
}

impl GrammarSet {
    pub fn new(grammars: Vec<Box<dyn StatsGrammar>>) -> Self {
        GrammarSet { grammars }
    }

    /// Fenced block first, then the classic block labelled with `user_name`.
    pub fn standard(user_name: &str) -> Self {
        let mut grammars: Vec<Box<dyn StatsGrammar>> = vec![Box::new(FencedGrammar)];
        match ClassicGrammar::new(user_name) {
            Ok(classic) => grammars.push(Box::new(classic)),
            Err(e) => tracing::warn!("Classic stats grammar disabled for '{}': {}", user_name, e),
        }
        GrammarSet::new(grammars)
    }

    pub fn extract(&self, text: &str) -> Option<Extraction> {
        self.grammars.iter().find_map(|grammar| {
            let found = grammar.extract(text);
            if found.is_some() {
                tracing::debug!("Stats payload matched {} grammar", grammar.name());
            }
            found
        })
    }
}

pub fn extract_stats(text: &str, user_name: &str) -> Option<Extraction> {
    GrammarSet::standard(user_name).extract(text)
}

/// Body of the first fenced block opened by three backticks plus `tag`.
///
/// With `tag_required` the tag and at least one whitespace character must
/// follow the opening fence; otherwise the tag is optional.
pub(crate) fn fenced_body<'a>(text: &'a str, tag: &str, tag_required: bool) -> Option<&'a str> {
    for (open, _) in text.match_indices(FENCE) {
        let after = &text[open + FENCE.len()..];
        let has_tag = after
            .get(..tag.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(tag));

        let rest = if has_tag {
            &after[tag.len()..]
        } else if tag_required {
            continue;
        } else {
            after
        };

        let body = rest.trim_start();
        if tag_required && body.len() == rest.len() {
            continue;
        }

        if let Some(close) = body.find(FENCE) {
            return Some(&body[..close]);
        }
    }
    None
}

pub(crate) fn strip_quotes(value: &str) -> &str {
    let value = strip_pair(value, '"');
    strip_pair(value, '\'')
}

fn strip_pair(value: &str, quote: char) -> &str {
    if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
        &value[1..value.len() - 1]
    } else {
        value
    }
}
