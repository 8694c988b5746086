//! Transfer control frames.
//!
//! Control frames are JSON text messages tagged by `type`:
//!
//! ```text
//! {"type":"file-meta","id":"9f2c...","name":"photo.jpg","size":40960}
//! {"type":"file-cancel","id":"9f2c...","name":"photo.jpg","reason":"receiver cancelled"}
//! {"type":"file-error","id":null,"name":null,"reason":"missing metadata before file data"}
//! ```
//!
//! `id` and `name` may be null or absent on cancel/error frames; a missing
//! reason falls back to `peer cancelled` / `peer error`.

use crate::error::{REASON_PEER_CANCELLED, REASON_PEER_ERROR};
use serde::{Deserialize, Serialize};

/// Wire tag of metadata frames
pub const TAG_META: &str = "file-meta";
/// Wire tag of cancel frames
pub const TAG_CANCEL: &str = "file-cancel";
/// Wire tag of error frames
pub const TAG_ERROR: &str = "file-error";

/// Transfer control message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Announces an object; opens the receiver's inbound transfer
    #[serde(rename = "file-meta")]
    Meta {
        /// Transfer id
        id: String,
        /// Object name
        name: String,
        /// Total size in bytes
        size: u64,
    },

    /// Cooperative cancellation
    #[serde(rename = "file-cancel")]
    Cancel {
        /// Transfer id (absent: the active transfer)
        #[serde(default)]
        id: Option<String>,
        /// Object name
        #[serde(default)]
        name: Option<String>,
        /// Reason
        #[serde(default)]
        reason: Option<String>,
    },

    /// Transfer failure report
    #[serde(rename = "file-error")]
    Error {
        /// Transfer id (absent: the active transfer)
        #[serde(default)]
        id: Option<String>,
        /// Object name
        #[serde(default)]
        name: Option<String>,
        /// Reason
        #[serde(default)]
        reason: Option<String>,
    },
}

impl ControlMessage {
    /// Build a `file-meta` frame
    pub fn meta(id: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        Self::Meta {
            id: id.into(),
            name: name.into(),
            size,
        }
    }

    /// Build a `file-cancel` frame
    pub fn cancel(id: impl Into<String>, name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cancel {
            id: Some(id.into()),
            name: Some(name.into()),
            reason: Some(reason.into()),
        }
    }

    /// Build a `file-error` frame; `id`/`name` are null when no transfer is known
    pub fn error(id: Option<String>, name: Option<String>, reason: impl Into<String>) -> Self {
        Self::Error {
            id,
            name,
            reason: Some(reason.into()),
        }
    }

    /// Wire tag
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Meta { .. } => TAG_META,
            Self::Cancel { .. } => TAG_CANCEL,
            Self::Error { .. } => TAG_ERROR,
        }
    }

    /// Transfer id, if any
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Meta { id, .. } => Some(id),
            Self::Cancel { id, .. } | Self::Error { id, .. } => id.as_deref(),
        }
    }

    /// Object name, if any
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Meta { name, .. } => Some(name),
            Self::Cancel { name, .. } | Self::Error { name, .. } => name.as_deref(),
        }
    }

    /// Reason with the protocol defaults applied (empty for `file-meta`)
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Meta { .. } => "",
            Self::Cancel { reason, .. } => reason
                .as_deref()
                .filter(|r| !r.is_empty())
                .unwrap_or(REASON_PEER_CANCELLED),
            Self::Error { reason, .. } => reason
                .as_deref()
                .filter(|r| !r.is_empty())
                .unwrap_or(REASON_PEER_ERROR),
        }
    }

    /// Encode as a JSON text frame
    #[must_use]
    pub fn encode(&self) -> String {
        // Derived serialization of strings, options and integers cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse a text frame; `None` if it is not a control frame
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}
