use serde::{Deserialize, Serialize};

/// Visibility of one entity's panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelState {
    #[default]
    Hidden,
    Shown,
    Minimized,
}

impl PanelState {
    pub fn visible(&self) -> bool {
        !matches!(self, PanelState::Hidden)
    }

    pub fn minimized(&self) -> bool {
        matches!(self, PanelState::Minimized)
    }

    /// Returns true when the state actually changed.
    pub fn show(&mut self) -> bool {
        self.transition(PanelState::Shown)
    }

    pub fn hide(&mut self) -> bool {
        self.transition(PanelState::Hidden)
    }

    /// No-op while hidden.
    pub fn toggle_minimize(&mut self) -> bool {
        match self {
            PanelState::Hidden => false,
            PanelState::Shown => self.transition(PanelState::Minimized),
            PanelState::Minimized => self.transition(PanelState::Shown),
        }
    }

    fn transition(&mut self, next: PanelState) -> bool {
        let changed = *self != next;
        *self = next;
        changed
    }
}

impl std::fmt::Display for PanelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PanelState::Hidden => write!(f, "hidden"),
            PanelState::Shown => write!(f, "shown"),
            PanelState::Minimized => write!(f, "minimized"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_from_any_state() {
        for mut state in [PanelState::Hidden, PanelState::Shown, PanelState::Minimized] {
            state.show();
            assert_eq!(state, PanelState::Shown);
        }
    }

    #[test]
    fn test_hide_from_any_state() {
        for mut state in [PanelState::Hidden, PanelState::Shown, PanelState::Minimized] {
            state.hide();
            assert_eq!(state, PanelState::Hidden);
            assert!(!state.visible());
        }
    }

    #[test]
    fn test_toggle_minimize() {
        let mut state = PanelState::Shown;
        assert!(state.toggle_minimize());
        assert_eq!(state, PanelState::Minimized);
        assert!(state.visible());
        assert!(state.minimized());

        assert!(state.toggle_minimize());
        assert_eq!(state, PanelState::Shown);
    }

    #[test]
    fn test_toggle_minimize_hidden_is_noop() {
        let mut state = PanelState::Hidden;
        assert!(!state.toggle_minimize());
        assert_eq!(state, PanelState::Hidden);
    }

    #[test]
    fn test_show_reports_change() {
        let mut state = PanelState::Shown;
        assert!(!state.show());
        state.hide();
        assert!(state.show());
    }
}
