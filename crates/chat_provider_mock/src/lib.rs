//! Deterministic mock implementation of the shared `chat_provider` contract.
//!
//! This crate contains no transport/protocol logic and is intended for local
//! development and contract-level integration testing.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chat_provider::{
    ApiParams, CancelSignal, ChatProvider, GenerationEvent, GenerationRequest, PromptRole,
    ProviderFeatures, ProviderProfile, Usage,
};
use serde_json::Value;

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

/// Parameters the mock accepts; anything else is rejected like a real backend would.
pub const KNOWN_PARAMS: [&str; 5] = ["temperature", "top_p", "max_tokens", "stop", "seed"];

/// One scripted outcome for the next run.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Streams `text` and finishes.
    Text(String),
    /// Streams the first `after_chunks` chunks of `text`, then reports
    /// cancellation as if the user interrupted the stream.
    Interrupted { text: String, after_chunks: usize },
    /// Fails the run with the given error.
    Fail(String),
}

impl From<&str> for MockReply {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Deterministic mock provider used by engine tests and local runs.
///
/// Scripted replies are consumed in order. Once the script is exhausted the
/// provider echoes the most recent user message.
#[derive(Debug)]
pub struct MockProvider {
    script: Mutex<VecDeque<MockReply>>,
    model_ids: Vec<String>,
    selected_model: Mutex<usize>,
    features: ProviderFeatures,
    usage: Option<Usage>,
    token_delay: Duration,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockProvider {
    /// Creates a mock provider with scripted replies and no artificial latency.
    #[must_use]
    pub fn new(replies: impl IntoIterator<Item = MockReply>) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().collect()),
            model_ids: vec!["mock".to_string(), "mock-large".to_string()],
            selected_model: Mutex::new(0),
            features: ProviderFeatures::MESSAGE_NAME_FIELD
                | ProviderFeatures::RESPONSE_STREAMING
                | ProviderFeatures::ATTACHMENTS,
            usage: None,
            token_delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Creates a mock provider from plain reply texts.
    #[must_use]
    pub fn with_replies<'a>(replies: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(replies.into_iter().map(MockReply::from))
    }

    #[must_use]
    pub fn with_features(mut self, features: ProviderFeatures) -> Self {
        self.features = features;
        self
    }

    #[must_use]
    pub fn with_models(mut self, model_ids: Vec<String>) -> Self {
        self.model_ids = sanitize_model_ids(model_ids);
        self
    }

    /// Reports `usage` with every completed run.
    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Sleeps between streamed chunks, which makes interactive cancellation observable.
    #[must_use]
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    /// Queues another scripted reply.
    pub fn push_reply(&self, reply: MockReply) {
        lock_unpoisoned(&self.script).push_back(reply);
    }

    /// Returns every request received so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    fn next_reply(&self, req: &GenerationRequest) -> MockReply {
        if let Some(reply) = lock_unpoisoned(&self.script).pop_front() {
            return reply;
        }

        let last_user = req
            .messages
            .iter()
            .rev()
            .find(|message| message.role == PromptRole::User)
            .map(|message| message.text.as_str())
            .unwrap_or("nothing");
        MockReply::Text(format!("You said: {last_user}"))
    }

    fn chunks_for(&self, text: &str, stream: bool) -> Vec<String> {
        if !(stream && self.features.contains(ProviderFeatures::RESPONSE_STREAMING)) {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut pending = String::new();
        for ch in text.chars() {
            pending.push(ch);
            if matches!(ch, ' ' | '\n') {
                chunks.push(std::mem::take(&mut pending));
            }
        }
        if !pending.is_empty() {
            chunks.push(pending);
        }
        chunks
    }

    fn stream_chunks(
        &self,
        run_id: u64,
        chunks: &[String],
        cancel: &CancelSignal,
        emit: &mut dyn FnMut(GenerationEvent),
    ) -> bool {
        for chunk in chunks {
            if cancel.load(Ordering::SeqCst) {
                return false;
            }

            emit(GenerationEvent::Chunk {
                run_id,
                text: chunk.clone(),
            });
            if !self.token_delay.is_zero() {
                thread::sleep(self.token_delay);
            }
        }

        !cancel.load(Ordering::SeqCst)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(Vec::new()).with_token_delay(Duration::from_millis(30))
    }
}

impl ChatProvider for MockProvider {
    fn profile(&self) -> ProviderProfile {
        let selected = *lock_unpoisoned(&self.selected_model);
        ProviderProfile {
            provider_id: MOCK_PROVIDER_ID.to_string(),
            model_id: self.model_ids[selected].clone(),
        }
    }

    fn features(&self) -> ProviderFeatures {
        self.features
    }

    fn valid_models(&self) -> Option<Vec<String>> {
        Some(self.model_ids.clone())
    }

    fn select_model(&self, model_id: &str) -> Result<ProviderProfile, String> {
        let Some(index) = self.model_ids.iter().position(|id| id == model_id) else {
            return Err(format!("{model_id} is currently unavailable"));
        };

        *lock_unpoisoned(&self.selected_model) = index;
        Ok(self.profile())
    }

    fn validate_params(&self, mut params: ApiParams) -> Result<ApiParams, String> {
        if let Some(unknown) = params
            .keys()
            .find(|key| !KNOWN_PARAMS.contains(&key.as_str()))
        {
            return Err(format!("{unknown} is not a supported parameter"));
        }

        if let Some(temperature) = params.get("temperature").and_then(Value::as_f64) {
            params.insert(
                "temperature".to_string(),
                Value::from(temperature.clamp(0.0, 2.0)),
            );
        }

        Ok(params)
    }

    fn generate(
        &self,
        req: GenerationRequest,
        cancel: CancelSignal,
        emit: &mut dyn FnMut(GenerationEvent),
    ) -> Result<(), String> {
        let run_id = req.run_id;
        lock_unpoisoned(&self.requests).push(req.clone());
        let reply = self.next_reply(&req);

        emit(GenerationEvent::Started { run_id });

        if cancel.load(Ordering::SeqCst) {
            emit(GenerationEvent::Cancelled { run_id });
            return Ok(());
        }

        match reply {
            MockReply::Fail(error) => {
                emit(GenerationEvent::Failed { run_id, error });
            }
            MockReply::Interrupted { text, after_chunks } => {
                let chunks = self.chunks_for(&text, req.stream);
                let delivered = &chunks[..after_chunks.min(chunks.len())];
                self.stream_chunks(run_id, delivered, &cancel, emit);
                emit(GenerationEvent::Cancelled { run_id });
            }
            MockReply::Text(text) => {
                let chunks = self.chunks_for(&text, req.stream);
                if !self.stream_chunks(run_id, &chunks, &cancel, emit) {
                    emit(GenerationEvent::Cancelled { run_id });
                    return Ok(());
                }

                if let Some(usage) = &self.usage {
                    emit(GenerationEvent::Usage {
                        run_id,
                        usage: usage.clone(),
                    });
                }
                emit(GenerationEvent::Finished { run_id });
            }
        }

        Ok(())
    }
}

fn sanitize_model_ids(model_ids: Vec<String>) -> Vec<String> {
    let mut sanitized: Vec<String> = model_ids
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect();

    if sanitized.is_empty() {
        sanitized.push("mock".to_string());
    }

    sanitized
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
