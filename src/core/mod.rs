pub mod error;
pub mod events;
pub mod merge;
pub mod normalize;
pub mod panel;
pub mod stats;
pub mod store;

pub use error::{Result, TrackerError};
pub use events::{NoticeLevel, TrackerEvent};
pub use merge::merge;
pub use normalize::{clamp_text_to_box, normalize};
pub use panel::PanelState;
pub use stats::{EntityKind, StatBlock, StatPatch};
pub use store::{
    JsonFileStorage, MemoryStorage, SharedStore, SnapshotStorage, Store, TrackedEntity, TrackerSnapshot,
    DEFAULT_BOT_NAME, DEFAULT_USER_NAME,
};
