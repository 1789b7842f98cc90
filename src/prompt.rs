use serde::Serialize;

use crate::chat::{ChatHistory, ChatTurn};
use crate::config::Settings;
use crate::core::{Result, StatBlock, TrackerSnapshot};

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a stats tracking system for roleplay chat.

Your job: infer and update the CURRENT stats for BOTH characters (the user and the assistant character) based on the recent conversation and the current stats.

Rules:
- Output MUST be valid JSON, and ONLY JSON. No Markdown fences, no commentary.
- Use this exact shape:
{
  "user": { "Health": 0-100, "Sustenance": 0-100, "Energy": 0-100, "Hygiene": 0-100, "Arousal": 0-100, "GenitalSize": number (cm), "Mood": "string", "Conditions": ["string", "..."], "Appearance": "string" },
  "bot":  { same fields as user }
}
- Clamp numeric values to 0..100.
- Conditions: pick up to 3 concise tags (single words or short phrases). If unknown, guess.
- Appearance: short free text (aim ~200 chars). Include physical traits + outfit. Use line breaks if helpful.
- Mood: a short descriptive word/phrase (e.g., "Neutral", "Happy", "Anxious", "Playful").
- Prefer small, realistic changes per update unless the messages clearly indicate a big change.
- Arousal equals to sexual arousal.
- Try to update each values as realistically as possible according to the current story.
- GenitalSize: realistic adult size in centimeters. Clamp to 0–100. GenitalSize should rarely change. Treat it as a physical constant.
"#;

/// Fixed instruction sent alongside every generation prompt
pub const GENERATION_INSTRUCTION: &str = "You update stats based on roleplay chat. Output ONLY valid JSON.";

const NO_MESSAGES: &str = "(no messages)";

#[derive(Serialize)]
struct PromptContext<'a> {
    user: &'a StatBlock,
    bot: &'a StatBlock,
    #[serde(rename = "botName")]
    bot_name: &'a str,
}

/// `speaker: text` with the text folded onto one line.
pub fn render_turn(turn: &ChatTurn) -> String {
    let text = turn.text.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("{}: {}", turn.speaker.trim(), text)
}

pub fn render_turns(turns: &[ChatTurn]) -> String {
    turns.iter().map(render_turn).collect::<Vec<_>>().join("\n")
}

/// Assemble the analysis prompt from the current snapshot and recent chat.
pub fn build_prompt(settings: &Settings, snapshot: &TrackerSnapshot, turns: &[ChatTurn]) -> Result<String> {
    let context = PromptContext {
        user: &snapshot.user.stats,
        bot: &snapshot.bot.stats,
        bot_name: &snapshot.bot.name,
    };
    let context = serde_json::to_string_pretty(&context)?;

    let recent = render_turns(turns);
    let recent = if recent.is_empty() { NO_MESSAGES } else { recent.as_str() };

    Ok([
        settings.system_prompt(),
        "",
        "Context:",
        context.as_str(),
        "",
        "Recent messages:",
        recent,
    ]
    .join("\n"))
}

/// Same as [`build_prompt`], reading the configured window from `history`.
pub fn build_prompt_from_history(
    settings: &Settings,
    snapshot: &TrackerSnapshot,
    history: &dyn ChatHistory,
) -> Result<String> {
    let turns = history.recent_turns(settings.recent_message_count());
    build_prompt(settings, snapshot, &turns)
}
