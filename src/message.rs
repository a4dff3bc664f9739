use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attachment kinds the router recognizes. Anything else is `Other` and does
/// not count as routable content on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Document,
    LinkPreview,
    Other,
}

impl AttachmentKind {
    pub fn is_recognized(&self) -> bool {
        !matches!(self, AttachmentKind::Other)
    }
}

/// An inbound group message. Immutable once received; the WhatsApp gateway is
/// the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub group_id: String,
    pub sender_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<AttachmentKind>,
}

impl Message {
    /// A message is routable when it carries text or at least one recognized
    /// attachment. Everything else goes straight to `Intent::Unhandled`.
    pub fn has_routable_content(&self) -> bool {
        !self.text.trim().is_empty() || self.attachments.iter().any(|a| a.is_recognized())
    }
}
