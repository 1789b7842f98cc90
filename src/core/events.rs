use serde::Serialize;

use super::stats::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Change notifications for whatever renders the panels
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// Stats of `kind` changed; `visible` tells a renderer whether to redraw now
    StatsChanged { kind: EntityKind, visible: bool },
    PanelChanged { kind: EntityKind },
    NameChanged { kind: EntityKind, name: String },
    /// User-visible report, only sent when system messages are enabled
    Notice { level: NoticeLevel, message: String },
}
