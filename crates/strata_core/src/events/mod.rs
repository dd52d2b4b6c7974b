//! Events produced while indexes are repaired and rebuilt.
//!
//! Consumers (a status bar, a CLI progress line, a websocket push) subscribe
//! through the [`EventBus`].

mod bus;

pub use bus::{EventBus, EventCallback, SubscriptionId};

use serde::{Deserialize, Serialize};

/// Events emitted by the reconciler and the loader side of the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IndexEvent {
    /// A reconciler phase started.
    Progress {
        /// 1-based phase number.
        phase: u8,
        /// Number of phases.
        total: u8,
        label: String,
    },

    /// Free-form status line, e.g. re-index progress.
    Status { message: String },

    /// On-disk content changed under open editors; they should reload.
    ReloadUi,

    /// User-facing notice shown for `timeout_ms`.
    Notice { message: String, timeout_ms: u64 },
}

impl IndexEvent {
    pub fn status(message: impl Into<String>) -> Self {
        IndexEvent::Status {
            message: message.into(),
        }
    }

    /// Variant name, as used for the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            IndexEvent::Progress { .. } => "Progress",
            IndexEvent::Status { .. } => "Status",
            IndexEvent::ReloadUi => "ReloadUi",
            IndexEvent::Notice { .. } => "Notice",
        }
    }
}
