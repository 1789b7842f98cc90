use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::core::{Result, TrackerError};

/// One rendered line of chat history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub speaker: String,
    pub text: String,
}

impl ChatTurn {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        ChatTurn {
            speaker: speaker.into(),
            text: text.into(),
        }
    }
}

/// Notifications from the host chat application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    AppReady,
    MessageReceived {
        #[serde(default)]
        is_user: bool,
        #[serde(default)]
        name: Option<String>,
        text: String,
    },
    ChatChanged {
        #[serde(default)]
        character: Option<String>,
    },
    CharacterChanged {
        #[serde(default)]
        character: Option<String>,
    },
}

/// Read access to the host's chat log
#[cfg_attr(test, mockall::automock)]
pub trait ChatHistory: Send + Sync {
    /// The last `n` turns, most recent last.
    fn recent_turns(&self, n: usize) -> Vec<ChatTurn>;
}

/// In-process chat log
#[derive(Debug, Default)]
pub struct Transcript {
    turns: RwLock<Vec<ChatTurn>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<ChatTurn>) -> Self {
        Transcript {
            turns: RwLock::new(turns),
        }
    }

    /// A JSON array of `{speaker, text}`; a missing file is an empty log.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::new());
        }
        let turns: Vec<ChatTurn> = serde_json::from_str(&content)?;
        Ok(Self::from_turns(turns))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let turns = self
            .turns
            .read()
            .map_err(|_| TrackerError::Storage("transcript lock poisoned".to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&*turns)?)?;
        Ok(())
    }

    pub fn push(&self, turn: ChatTurn) {
        if let Ok(mut turns) = self.turns.write() {
            turns.push(turn);
        }
    }

    /// Record a received message the way the host labels speakers.
    pub fn record(&self, event: &ChatEvent, bot_name: &str) {
        if let ChatEvent::MessageReceived { is_user, name, text } = event {
            let speaker = match (*is_user, name.as_deref().map(str::trim)) {
                (true, _) => "User".to_string(),
                (false, Some(name)) if !name.is_empty() => name.to_string(),
                (false, _) => bot_name.to_string(),
            };
            self.push(ChatTurn::new(speaker, text.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.turns.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChatHistory for Transcript {
    fn recent_turns(&self, n: usize) -> Vec<ChatTurn> {
        match self.turns.read() {
            Ok(turns) => {
                let start = turns.len().saturating_sub(n);
                turns[start..].to_vec()
            }
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_turns_most_recent_last() {
        let transcript = Transcript::new();
        for i in 0..5 {
            transcript.push(ChatTurn::new("User", format!("message {}", i)));
        }

        let recent = transcript.recent_turns(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].text, "message 3");
        assert_eq!(recent[1].text, "message 4");
        assert_eq!(transcript.recent_turns(50).len(), 5);
    }

    #[test]
    fn test_record_labels_speakers() {
        let transcript = Transcript::new();
        transcript.record(
            &ChatEvent::MessageReceived { is_user: true, name: Some("Ari".into()), text: "hi".into() },
            "Nyx",
        );
        transcript.record(
            &ChatEvent::MessageReceived { is_user: false, name: None, text: "hello".into() },
            "Nyx",
        );
        transcript.record(&ChatEvent::AppReady, "Nyx");

        let turns = transcript.recent_turns(10);
        assert_eq!(turns, vec![ChatTurn::new("User", "hi"), ChatTurn::new("Nyx", "hello")]);
    }

    #[test]
    fn test_event_json_shape() {
        let event: ChatEvent =
            serde_json::from_str(r#"{"type": "message_received", "text": "*waves*"}"#).unwrap();
        assert_eq!(
            event,
            ChatEvent::MessageReceived { is_user: false, name: None, text: "*waves*".to_string() }
        );

        let event: ChatEvent = serde_json::from_str(r#"{"type": "character_changed", "character": "Nyx"}"#).unwrap();
        assert_eq!(event, ChatEvent::CharacterChanged { character: Some("Nyx".to_string()) });
    }

    #[test]
    fn test_transcript_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.json");
        assert!(Transcript::load(&path).unwrap().is_empty());

        let transcript = Transcript::new();
        transcript.push(ChatTurn::new("Nyx", "The rain stops."));
        transcript.save(&path).unwrap();

        let loaded = Transcript::load(&path).unwrap();
        assert_eq!(loaded.recent_turns(1), vec![ChatTurn::new("Nyx", "The rain stops.")]);
    }
}
