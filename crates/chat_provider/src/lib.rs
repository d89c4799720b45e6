//! Minimal provider-agnostic contract for generating one chat reply.
//!
//! This crate defines only the prompt shape a provider receives, the lifecycle
//! events it emits, and the optional features it may declare. It excludes
//! transport details, wire payloads, and any thread or session state.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::{atomic::AtomicBool, Arc};

use serde_json::{Map, Value};

/// Identifier for one generation run.
pub type RunId = u64;

/// Shared cancellation flag for a run.
pub type CancelSignal = Arc<AtomicBool>;

/// Provider-specific request parameters (temperature, max tokens, ...).
pub type ApiParams = Map<String, Value>;

/// Error returned while constructing/configuring a provider before any run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInitError {
    message: String,
}

impl ProviderInitError {
    /// Creates a new provider initialization error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the underlying error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ProviderInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ProviderInitError {}

impl From<String> for ProviderInitError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ProviderInitError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Optional behaviors a provider may implement.
///
/// Callers query this set before taking optional code paths; anything not
/// declared is stripped from the request rather than sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ProviderFeatures(u8);

impl ProviderFeatures {
    /// The provider honors `PromptMessage::name`.
    pub const MESSAGE_NAME_FIELD: Self = Self(1);
    /// The provider can deliver a reply as incremental chunks.
    pub const RESPONSE_STREAMING: Self = Self(1 << 1);
    /// The provider accepts image/audio attachments.
    pub const ATTACHMENTS: Self = Self(1 << 2);
    /// Content received before a cancellation may be kept as a reply.
    pub const PARTIAL_COMMIT_ON_CANCEL: Self = Self(1 << 3);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn all() -> Self {
        Self(0b1111)
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for ProviderFeatures {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ProviderFeatures {
    fn bitor_assign(&mut self, rhs: Self) {
        self.insert(rhs);
    }
}

/// Conversational role as seen by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptRole {
    User,
    Assistant,
    System,
}

impl PromptRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// Media kind of a prompt attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentKind {
    Image,
    Audio,
}

/// Attachment payload reachable by URL (including `data:` URLs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptAttachment {
    pub kind: AttachmentKind,
    pub url: String,
    pub detail: Option<String>,
}

/// Provider-neutral model-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub text: String,
    pub name: Option<String>,
    pub attachments: Vec<PromptAttachment>,
}

impl PromptMessage {
    #[must_use]
    pub fn new(role: PromptRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            name: None,
            attachments: Vec::new(),
        }
    }
}

/// Input required to start a generation run.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub run_id: RunId,
    pub messages: Vec<PromptMessage>,
    pub params: ApiParams,
    /// Whether the caller wants incremental chunks. Only meaningful when the
    /// provider declares [`ProviderFeatures::RESPONSE_STREAMING`].
    pub stream: bool,
}

/// Token and cost accounting for one reply. Every field is optional because
/// not every backend reports it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Usage {
    pub prompt_tokens: Option<u64>,
    pub sampled_tokens: Option<u64>,
    pub cost_in_cents: Option<f64>,
}

/// Provider-emitted lifecycle event for a run.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    Started { run_id: RunId },
    Chunk { run_id: RunId, text: String },
    Usage { run_id: RunId, usage: Usage },
    Finished { run_id: RunId },
    Failed { run_id: RunId, error: String },
    Cancelled { run_id: RunId },
}

impl GenerationEvent {
    /// Returns the run identifier associated with this event.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        match self {
            Self::Started { run_id }
            | Self::Chunk { run_id, .. }
            | Self::Usage { run_id, .. }
            | Self::Finished { run_id }
            | Self::Failed { run_id, .. }
            | Self::Cancelled { run_id } => *run_id,
        }
    }

    /// Returns true when this event terminates the run lifecycle.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

/// Immutable metadata describing a chat provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider_id: String,
    pub model_id: String,
}

/// Provider interface for generating one reply from a message sequence.
pub trait ChatProvider: Send + Sync + 'static {
    /// Returns provider/model identity metadata.
    fn profile(&self) -> ProviderProfile;

    /// Returns the optional features this provider implements.
    fn features(&self) -> ProviderFeatures {
        ProviderFeatures::empty()
    }

    /// Returns the selectable model ids, or `None` when the provider cannot
    /// enumerate them.
    fn valid_models(&self) -> Option<Vec<String>> {
        None
    }

    /// Selects the model used by future runs.
    ///
    /// Providers may return an error when model selection is unsupported.
    fn select_model(&self, _model_id: &str) -> Result<ProviderProfile, String> {
        Err("Model selection is not supported by this provider".to_string())
    }

    /// Validates a full parameter set, returning it possibly adjusted
    /// (for example clamped into range). Unknown or unsupported keys are errors.
    fn validate_params(&self, params: ApiParams) -> Result<ApiParams, String> {
        Ok(params)
    }

    /// Executes a request and emits lifecycle events in provider order.
    ///
    /// Providers poll `cancel` and emit `Cancelled` once they observe it.
    fn generate(
        &self,
        req: GenerationRequest,
        cancel: CancelSignal,
        emit: &mut dyn FnMut(GenerationEvent),
    ) -> Result<(), String>;
}
