//! Caller-supplied cacheable content.
//!
//! The cache never inspects domain semantics beyond this shape: an upstream
//! collaborator decides what text, images, and metadata make up a turn.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of content being cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Multimodal,
}

impl ContentKind {
    /// Short tag used as the leading component of generated keys.
    pub fn tag(self) -> &'static str {
        match self {
            ContentKind::Text => "txt",
            ContentKind::Multimodal => "mm",
        }
    }

    /// Parse a key tag back into a kind.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "txt" => Some(ContentKind::Text),
            "mm" => Some(ContentKind::Multimodal),
            _ => None,
        }
    }

    /// Name used when matching policy conditions.
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Multimodal => "multimodal",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content a caller wants a key and a policy for. Never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheableContent {
    pub kind: ContentKind,
    pub text: String,
    pub images: Vec<Bytes>,
    pub metadata: Option<Map<String, Value>>,
}

impl CacheableContent {
    /// Plain text content without images or metadata.
    pub fn text(text: impl Into<String>) -> Self {
        Self { kind: ContentKind::Text, text: text.into(), images: Vec::new(), metadata: None }
    }

    /// Text accompanied by one or more image blobs.
    pub fn multimodal(text: impl Into<String>, images: Vec<Bytes>) -> Self {
        Self { kind: ContentKind::Multimodal, text: text.into(), images, metadata: None }
    }

    /// Attach a metadata map.
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Number of characters in the raw text.
    pub fn text_len(&self) -> usize {
        self.text.chars().count()
    }
}
