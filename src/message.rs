//! Message and attachment records.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Free-form per-message annotations.
pub type Metadata = Map<String, Value>;

/// Conversational role of a message author.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub const ALL: [Self; 3] = [Self::User, Self::Assistant, Self::System];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRoleError(String);

impl fmt::Display for ParseRoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Role::ALL.iter().map(|role| role.as_str()).collect();
        write!(f, "{:?} is not one of {}", self.0, names.join(", "))
    }
}

impl std::error::Error for ParseRoleError {}

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

pub const IMAGE_ATTACHMENT_TYPE: &str = "image_url";
pub const AUDIO_ATTACHMENT_TYPE: &str = "audio";

/// A non-text part of a message.
///
/// Attachments of a type this crate does not recognize are kept as
/// [`Attachment::Unknown`] so that loading and saving a document never loses
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawAttachment", into = "RawAttachment")]
pub enum Attachment {
    Image { url: String, detail: Option<String> },
    Audio { url: String },
    Unknown { kind: Option<String>, data: Value },
}

impl Attachment {
    #[must_use]
    pub fn image(url: impl Into<String>) -> Self {
        Self::Image {
            url: url.into(),
            detail: None,
        }
    }

    #[must_use]
    pub fn audio(url: impl Into<String>) -> Self {
        Self::Audio { url: url.into() }
    }

    /// Reads an image file and embeds it as a `data:` URL.
    pub fn image_from_path(path: &Path, detail: Option<String>) -> io::Result<Self> {
        Ok(Self::Image {
            url: data_url(path)?,
            detail,
        })
    }

    /// Reads an audio file and embeds it as a `data:` URL.
    pub fn audio_from_path(path: &Path) -> io::Result<Self> {
        Ok(Self::Audio {
            url: data_url(path)?,
        })
    }

    /// Persisted type tag of this attachment.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Image { .. } => IMAGE_ATTACHMENT_TYPE,
            Self::Audio { .. } => AUDIO_ATTACHMENT_TYPE,
            Self::Unknown { kind, .. } => kind.as_deref().unwrap_or("unknown"),
        }
    }
}

fn data_url(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    Ok(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
}

/// On-disk shape shared by every attachment: `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawAttachment {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default = "empty_object")]
    data: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl From<RawAttachment> for Attachment {
    fn from(raw: RawAttachment) -> Self {
        let url = raw.data.get("url").and_then(Value::as_str).map(str::to_string);
        match (raw.kind.as_deref(), url) {
            (Some(IMAGE_ATTACHMENT_TYPE), Some(url)) => {
                let detail = raw
                    .data
                    .get("detail")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Self::Image { url, detail }
            }
            (Some(AUDIO_ATTACHMENT_TYPE), Some(url)) => Self::Audio { url },
            _ => Self::Unknown {
                kind: raw.kind,
                data: raw.data,
            },
        }
    }
}

impl From<Attachment> for RawAttachment {
    fn from(attachment: Attachment) -> Self {
        match attachment {
            Attachment::Image { url, detail } => {
                let mut data = json!({ "url": url });
                if let Some(detail) = detail {
                    data["detail"] = Value::String(detail);
                }
                Self {
                    kind: Some(IMAGE_ATTACHMENT_TYPE.to_string()),
                    data,
                }
            }
            Attachment::Audio { url } => Self {
                kind: Some(AUDIO_ATTACHMENT_TYPE.to_string()),
                data: json!({ "url": url }),
            },
            Attachment::Unknown { kind, data } => Self { kind, data },
        }
    }
}

/// One turn of a conversation.
///
/// `role` and `content` describe the turn itself; `name`, `sticky`, and
/// `metadata` are annotations that thread operations may change later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    pub role: Role,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "_sticky")]
    pub sticky: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role,
            name: None,
            sticky: false,
            attachments: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    #[must_use]
    pub fn with_sticky(mut self, sticky: bool) -> Self {
        self.sticky = sticky;
        self
    }

    /// Author label shown in transcripts: the name when set, else the role.
    #[must_use]
    pub fn author(&self) -> &str {
        self.name.as_deref().unwrap_or(self.role.as_str())
    }

    /// State markers shown before the author: `*` for sticky, one `@` per attachment.
    #[must_use]
    pub fn indicators(&self) -> String {
        let mut out = String::new();
        if self.sticky {
            out.push('*');
        }
        out.extend(std::iter::repeat('@').take(self.attachments.len()));
        out
    }

    /// Renders the message as one transcript entry.
    #[must_use]
    pub fn render(&self, display_indicators: bool) -> String {
        let prefix = if display_indicators {
            self.indicators()
        } else {
            String::new()
        };
        format!("{prefix}{}: {}", self.author(), self.content)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{Attachment, Message, Role};

    #[test]
    fn role_parses_and_displays_lowercase_names() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
            assert_eq!(role.to_string(), role.as_str());
        }
        assert!("moderator".parse::<Role>().is_err());
    }

    #[test]
    fn message_serializes_every_field() {
        let mut message = Message::user("hi")
            .with_name("Ada")
            .with_sticky(true)
            .with_attachment(Attachment::Image {
                url: "https://example.com/cat.png".to_string(),
                detail: Some("low".to_string()),
            });
        message.metadata.insert("score".to_string(), json!(3));

        let value = serde_json::to_value(&message).expect("message should serialize");
        assert_eq!(
            value,
            json!({
                "content": "hi",
                "role": "user",
                "name": "Ada",
                "sticky": true,
                "attachments": [{
                    "type": "image_url",
                    "data": {"url": "https://example.com/cat.png", "detail": "low"},
                }],
                "metadata": {"score": 3},
            })
        );
    }

    #[test]
    fn legacy_sticky_key_and_missing_fields_are_accepted() {
        let message: Message = serde_json::from_value(json!({
            "content": "be brief",
            "role": "system",
            "_sticky": true,
        }))
        .expect("legacy message should parse");

        assert!(message.sticky);
        assert!(message.name.is_none());
        assert!(message.attachments.is_empty());
        assert!(message.metadata.is_empty());
    }

    #[test]
    fn unknown_attachment_is_preserved_verbatim() {
        let raw = json!({"type": "hologram", "data": {"frames": [1, 2, 3]}});
        let attachment: Attachment =
            serde_json::from_value(raw.clone()).expect("attachment should parse");

        assert_eq!(
            attachment,
            Attachment::Unknown {
                kind: Some("hologram".to_string()),
                data: json!({"frames": [1, 2, 3]}),
            }
        );
        assert_eq!(attachment.kind(), "hologram");
        assert_eq!(
            serde_json::to_value(&attachment).expect("attachment should serialize"),
            raw
        );
    }

    #[test]
    fn image_without_url_is_treated_as_unknown() {
        let attachment: Attachment =
            serde_json::from_value(json!({"type": "image_url", "data": {}}))
                .expect("attachment should parse");
        assert!(matches!(attachment, Attachment::Unknown { .. }));
    }

    #[test]
    fn audio_attachment_round_trips() {
        let attachment = Attachment::audio("data:audio/wav;base64,AAAA");
        let value = serde_json::to_value(&attachment).expect("attachment should serialize");
        assert_eq!(
            value,
            json!({"type": "audio", "data": {"url": "data:audio/wav;base64,AAAA"}})
        );
        let parsed: Attachment = serde_json::from_value(value).expect("attachment should parse");
        assert_eq!(parsed, attachment);
    }

    #[test]
    fn image_from_path_embeds_base64_data_url() {
        let mut file = tempfile::Builder::new()
            .suffix(".png")
            .tempfile()
            .expect("temp file should be created");
        file.write_all(b"png!").expect("bytes should be written");

        let attachment =
            Attachment::image_from_path(file.path(), None).expect("image should be read");
        assert_eq!(attachment, Attachment::image("data:image/png;base64,cG5nIQ=="));
    }

    #[test]
    fn render_uses_name_and_indicators() {
        let message = Message::assistant("sure")
            .with_name("Bot")
            .with_sticky(true)
            .with_attachment(Attachment::image("a"))
            .with_attachment(Attachment::image("b"));

        assert_eq!(message.render(true), "*@@Bot: sure");
        assert_eq!(message.render(false), "Bot: sure");
        assert_eq!(Message::user("x").render(true), "user: x");
    }
}
