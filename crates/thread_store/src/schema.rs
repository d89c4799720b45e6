use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use threadkeeper::{Message, Role, Thread};

/// Version written into `_meta.version`. Documents with a newer major
/// version are refused.
pub const FORMAT_VERSION: &str = "2.2.0";

pub(crate) const FORMAT_MAJOR: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadDocument {
    #[serde(rename = "_meta")]
    pub meta: DocumentMeta,
    #[serde(default)]
    pub threads: BTreeMap<String, ThreadRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<String>,
    /// Any other keys, kept as found.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DocumentMeta {
    #[must_use]
    pub fn current(saved_at: impl Into<String>) -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            saved_at: Some(saved_at.into()),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRecord {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub names: BTreeMap<Role, String>,
}

impl From<&Thread> for ThreadRecord {
    fn from(thread: &Thread) -> Self {
        Self {
            messages: thread.messages().to_vec(),
            names: thread.default_names().clone(),
        }
    }
}

impl From<ThreadRecord> for Thread {
    fn from(record: ThreadRecord) -> Self {
        Thread::from_parts(record.messages, record.names)
    }
}

/// Major component of a `major.minor.patch` version string.
pub(crate) fn major_version(version: &str) -> Option<u64> {
    version.split('.').next()?.trim().parse().ok()
}
