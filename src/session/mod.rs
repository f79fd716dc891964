pub mod events;
pub mod manager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use events::SessionEvent;
pub use manager::{SessionDeps, SessionManager};

/// Which feed of the telescope camera to stream.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Raw live view.
    Live,
    /// Live-stacked deep-sky image.
    Stacked,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Live => f.write_str("live"),
            StreamKind::Stacked => f.write_str("stacked"),
        }
    }
}

/// A registry-side video session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub target_name: String,
    pub stream_kind: StreamKind,
    /// Registry-defined lifecycle state, opaque to the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, target_name: impl Into<String>, stream_kind: StreamKind) -> Self {
        Self {
            session_id: session_id.into(),
            target_name: target_name.into(),
            stream_kind,
            state: None,
            created_at: Some(Utc::now()),
        }
    }
}
