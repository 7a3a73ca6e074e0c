use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Binary class label. Stored as 0/1 in every on-disk table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Legitimate,
    Phishing,
}

impl Label {
    pub fn as_u8(self) -> u8 {
        match self {
            Label::Legitimate => 0,
            Label::Phishing => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Label> {
        match value {
            0 => Some(Label::Legitimate),
            1 => Some(Label::Phishing),
            _ => None,
        }
    }
}

/// One email in the canonical schema. Subject and body are normalized
/// (HTML-stripped, lowercased, whitespace-collapsed) exactly once, by the
/// corpus cleaner; nothing downstream re-normalizes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRecord {
    pub sender: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub has_attachment: bool,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub label: Option<Label>,
}

impl EmailRecord {
    /// Content identity: SHA-256 over (sender, subject, body). Two records
    /// with the same identity are the same email for deduplication and
    /// partition-disjointness purposes.
    pub fn content_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sender.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.subject.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.body.as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Domain part of the sender address, trailing `>` trimmed.
    pub fn sender_domain(&self) -> Option<&str> {
        let at = self.sender.rfind('@')?;
        let domain = &self.sender[at + 1..];
        Some(domain.trim_end_matches('>'))
    }
}

/// Canonical column names for the merged table.
pub const CANONICAL_COLUMNS: &[&str] = &[
    "sender",
    "subject",
    "body",
    "date",
    "reply_to",
    "message_id",
    "content_type",
    "has_attachment",
    "urls",
    "label",
];

/// Map a source CSV header to its canonical column, if it is one we keep.
/// Source datasets disagree on naming (`From` vs `sender`, `Body` vs
/// `message`); this mapping is applied once, at merge time.
pub fn canonical_column(header: &str) -> Option<&'static str> {
    match header.trim().to_lowercase().as_str() {
        "from" | "sender" => Some("sender"),
        "subject" => Some("subject"),
        "body" | "message" | "text" => Some("body"),
        "date" => Some("date"),
        "reply-to" | "reply_to" => Some("reply_to"),
        "message-id" | "message_id" => Some("message_id"),
        "content-type" | "content_type" => Some("content_type"),
        "has_attachment" | "attachment" => Some("has_attachment"),
        "urls" => Some("urls"),
        "label" => Some("label"),
        _ => None,
    }
}
