//! Bridge between threads and a [`ChatProvider`].
//!
//! The gateway converts messages into the provider-neutral prompt shape,
//! honoring the provider's declared features, drives one run to its terminal
//! event, and folds the emitted events into a [`Reply`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chat_provider::{
    ApiParams, AttachmentKind, CancelSignal, ChatProvider, GenerationEvent, GenerationRequest,
    PromptAttachment, PromptMessage, PromptRole, ProviderFeatures, ProviderProfile, RunId, Usage,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{GenerationError, ThreadError};
use crate::message::{Attachment, Message, Role};
use crate::session::Session;

/// Per-session request settings sent with every run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationSettings {
    pub params: ApiParams,
    pub stream: bool,
}

/// The outcome of a successful run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub content: String,
    pub usage: Option<Usage>,
    /// The run was cancelled and `content` holds what arrived before that.
    pub partial: bool,
}

pub struct Gateway {
    provider: Arc<dyn ChatProvider>,
    settings: GenerationSettings,
    next_run_id: RunId,
}

impl Gateway {
    /// Wraps a provider, streaming by default when the provider can.
    #[must_use]
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        let stream = provider
            .features()
            .contains(ProviderFeatures::RESPONSE_STREAMING);
        Self {
            provider,
            settings: GenerationSettings {
                params: ApiParams::new(),
                stream,
            },
            next_run_id: 1,
        }
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<dyn ChatProvider> {
        &self.provider
    }

    #[must_use]
    pub fn profile(&self) -> ProviderProfile {
        self.provider.profile()
    }

    #[must_use]
    pub fn features(&self) -> ProviderFeatures {
        self.provider.features()
    }

    #[must_use]
    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Sets one request parameter. The provider validates the whole resulting
    /// set; on rejection the previous set is kept.
    pub fn set_param(&mut self, key: impl Into<String>, value: Value) -> Result<(), GenerationError> {
        let mut params = self.settings.params.clone();
        params.insert(key.into(), value);
        self.settings.params = self
            .provider
            .validate_params(params)
            .map_err(GenerationError::InvalidParams)?;
        Ok(())
    }

    /// Removes one parameter, or all of them when `key` is `None`. Returns how
    /// many were removed.
    pub fn unset_param(&mut self, key: Option<&str>) -> usize {
        match key {
            Some(key) => usize::from(self.settings.params.remove(key).is_some()),
            None => {
                let count = self.settings.params.len();
                self.settings.params.clear();
                count
            }
        }
    }

    pub fn set_stream(&mut self, stream: bool) -> Result<(), GenerationError> {
        if stream && !self.features().contains(ProviderFeatures::RESPONSE_STREAMING) {
            return Err(GenerationError::StreamingUnsupported {
                provider: self.profile().provider_id,
            });
        }
        self.settings.stream = stream;
        Ok(())
    }

    /// Switches models, checking the provider's model list when it has one.
    pub fn select_model(&mut self, model: &str) -> Result<ProviderProfile, GenerationError> {
        if let Some(valid) = self.provider.valid_models() {
            if !valid.iter().any(|candidate| candidate == model) {
                return Err(GenerationError::UnknownModel {
                    provider: self.profile().provider_id,
                    model: model.to_string(),
                });
            }
        }

        let profile = self
            .provider
            .select_model(model)
            .map_err(GenerationError::ModelSelection)?;
        info!(provider = %profile.provider_id, model = %profile.model_id, "model selected");
        Ok(profile)
    }

    /// Converts messages into the prompt shape, stripping what the provider
    /// has not declared support for.
    pub fn prompt(&self, messages: &[Message]) -> Result<Vec<PromptMessage>, GenerationError> {
        let features = self.features();
        let keep_names = features.contains(ProviderFeatures::MESSAGE_NAME_FIELD);
        let keep_attachments = features.contains(ProviderFeatures::ATTACHMENTS);

        let mut dropped = 0;
        let mut prompt = Vec::with_capacity(messages.len());
        for message in messages {
            let attachments = if keep_attachments {
                message
                    .attachments
                    .iter()
                    .map(|attachment| self.prompt_attachment(attachment))
                    .collect::<Result<Vec<_>, _>>()?
            } else {
                dropped += message.attachments.len();
                Vec::new()
            };

            prompt.push(PromptMessage {
                role: prompt_role(message.role),
                text: message.content.clone(),
                name: message.name.clone().filter(|_| keep_names),
                attachments,
            });
        }

        if dropped > 0 {
            warn!(
                dropped,
                provider = %self.profile().provider_id,
                "provider does not accept attachments; sending text only"
            );
        }
        Ok(prompt)
    }

    fn prompt_attachment(&self, attachment: &Attachment) -> Result<PromptAttachment, GenerationError> {
        match attachment {
            Attachment::Image { url, detail } => Ok(PromptAttachment {
                kind: AttachmentKind::Image,
                url: url.clone(),
                detail: detail.clone(),
            }),
            Attachment::Audio { url } => Ok(PromptAttachment {
                kind: AttachmentKind::Audio,
                url: url.clone(),
                detail: None,
            }),
            Attachment::Unknown { .. } => Err(GenerationError::UnsupportedAttachment {
                provider: self.profile().provider_id,
                kind: attachment.kind().to_string(),
            }),
        }
    }

    /// Runs one generation over `messages`.
    ///
    /// `on_chunk` sees reply text as it arrives. A cancelled run succeeds only
    /// when the provider declares partial commit and some text arrived.
    pub fn generate(
        &mut self,
        messages: &[Message],
        cancel: CancelSignal,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<Reply, GenerationError> {
        let run_id = self.next_run_id;
        self.next_run_id += 1;

        let request = GenerationRequest {
            run_id,
            messages: self.prompt(messages)?,
            params: self.settings.params.clone(),
            stream: self.settings.stream
                && self.features().contains(ProviderFeatures::RESPONSE_STREAMING),
        };

        debug!(run_id, messages = request.messages.len(), stream = request.stream, "run started");
        let mut collector = RunCollector::new(run_id);
        self.provider
            .generate(request, cancel, &mut |event| collector.observe(event, on_chunk))
            .map_err(GenerationError::Provider)?;

        let partial_commit = self
            .features()
            .contains(ProviderFeatures::PARTIAL_COMMIT_ON_CANCEL);
        collector.finish(partial_commit)
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("profile", &self.profile())
            .field("settings", &self.settings)
            .field("next_run_id", &self.next_run_id)
            .finish()
    }
}

fn prompt_role(role: Role) -> PromptRole {
    match role {
        Role::User => PromptRole::User,
        Role::Assistant => PromptRole::Assistant,
        Role::System => PromptRole::System,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Terminal {
    Finished,
    Failed(String),
    Cancelled,
}

struct RunCollector {
    run_id: RunId,
    content: String,
    usage: Option<Usage>,
    terminal: Option<Terminal>,
}

impl RunCollector {
    fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            content: String::new(),
            usage: None,
            terminal: None,
        }
    }

    fn observe(&mut self, event: GenerationEvent, on_chunk: &mut dyn FnMut(&str)) {
        if event.run_id() != self.run_id || self.terminal.is_some() {
            return;
        }

        match event {
            GenerationEvent::Started { .. } => {}
            GenerationEvent::Chunk { text, .. } => {
                on_chunk(&text);
                self.content.push_str(&text);
            }
            GenerationEvent::Usage { usage, .. } => self.usage = Some(usage),
            GenerationEvent::Finished { .. } => self.terminal = Some(Terminal::Finished),
            GenerationEvent::Failed { error, .. } => self.terminal = Some(Terminal::Failed(error)),
            GenerationEvent::Cancelled { .. } => self.terminal = Some(Terminal::Cancelled),
        }
    }

    fn finish(self, partial_commit: bool) -> Result<Reply, GenerationError> {
        let run_id = self.run_id;
        match self.terminal {
            Some(Terminal::Finished) if self.content.is_empty() => Err(GenerationError::EmptyReply),
            Some(Terminal::Finished) => {
                debug!(run_id, chars = self.content.len(), "run finished");
                Ok(Reply {
                    content: self.content,
                    usage: self.usage,
                    partial: false,
                })
            }
            Some(Terminal::Failed(error)) => {
                warn!(run_id, %error, "run failed");
                Err(GenerationError::Provider(error))
            }
            Some(Terminal::Cancelled) if partial_commit && !self.content.is_empty() => {
                info!(run_id, "run cancelled; keeping partial reply");
                Ok(Reply {
                    content: self.content,
                    usage: self.usage,
                    partial: true,
                })
            }
            Some(Terminal::Cancelled) => {
                info!(run_id, "run cancelled");
                Err(GenerationError::Cancelled)
            }
            None => Err(GenerationError::Incomplete { run_id }),
        }
    }
}

/// Sends the current thread and appends the reply as an assistant message.
///
/// While the provider runs, the target thread is marked busy. On any failure
/// the thread is left exactly as it was.
pub fn send(
    session: &mut Session,
    gateway: &mut Gateway,
    cancel: CancelSignal,
    on_chunk: &mut dyn FnMut(&str),
) -> Result<Reply, ThreadError> {
    let pending = session.begin_generation()?;
    match gateway.generate(pending.prompt(), cancel, on_chunk) {
        Ok(reply) => {
            session.complete_generation(pending, reply.content.clone())?;
            Ok(reply)
        }
        Err(error) => {
            session.abandon_generation(pending);
            Err(error.into())
        }
    }
}

/// A fresh, unset cancellation flag.
#[must_use]
pub fn cancel_signal() -> CancelSignal {
    Arc::new(AtomicBool::new(false))
}

/// Raises a cancellation flag.
pub fn request_cancel(cancel: &CancelSignal) {
    cancel.store(true, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chat_provider::{AttachmentKind, ProviderFeatures, Usage};
    use chat_provider_mock::{MockProvider, MockReply};
    use serde_json::json;

    use super::{cancel_signal, request_cancel, send, Gateway};
    use crate::error::{GenerationError, ThreadError};
    use crate::message::{Attachment, Message};
    use crate::session::Session;

    fn gateway(provider: MockProvider) -> (Arc<MockProvider>, Gateway) {
        let provider = Arc::new(provider);
        (Arc::clone(&provider), Gateway::new(provider))
    }

    fn session_with(messages: Vec<Message>) -> Session {
        let mut session = Session::new();
        let thread = session.current_mut().expect("detached should be idle");
        for message in messages {
            thread.append(message);
        }
        session
    }

    #[test]
    fn send_appends_streamed_reply_and_reports_chunks() {
        let (_, mut gateway) = gateway(MockProvider::with_replies(["hello there"]));
        let mut session = session_with(vec![Message::user("hi")]);
        let mut chunks = Vec::new();

        let reply = send(&mut session, &mut gateway, cancel_signal(), &mut |chunk| {
            chunks.push(chunk.to_string())
        })
        .expect("send should succeed");

        assert_eq!(reply.content, "hello there");
        assert_eq!(chunks, vec!["hello ", "there"]);
        let last = session.current().last().expect("reply should be appended");
        assert_eq!(last, &Message::assistant("hello there"));
    }

    #[test]
    fn failed_run_leaves_thread_unchanged() {
        let (_, mut gateway) = gateway(MockProvider::new(vec![MockReply::Fail(
            "rate limited".to_string(),
        )]));
        let mut session = session_with(vec![Message::user("hi")]);

        let error = send(&mut session, &mut gateway, cancel_signal(), &mut |_| {})
            .expect_err("send must fail");
        assert_eq!(
            error,
            ThreadError::Generation(GenerationError::Provider("rate limited".to_string()))
        );
        assert_eq!(session.current().len(), 1);
        assert!(session.current_mut().is_ok());
    }

    #[test]
    fn empty_reply_is_an_error() {
        let (_, mut gateway) = gateway(MockProvider::with_replies([""]));
        let mut session = session_with(vec![Message::user("hi")]);

        let error = send(&mut session, &mut gateway, cancel_signal(), &mut |_| {})
            .expect_err("empty reply must fail");
        assert_eq!(error, ThreadError::Generation(GenerationError::EmptyReply));
        assert_eq!(session.current().len(), 1);
    }

    #[test]
    fn cancellation_discards_partial_reply_without_partial_commit() {
        let (_, mut gateway) = gateway(MockProvider::new(vec![MockReply::Interrupted {
            text: "half an answer".to_string(),
            after_chunks: 1,
        }]));
        let mut session = session_with(vec![Message::user("hi")]);

        let error = send(&mut session, &mut gateway, cancel_signal(), &mut |_| {})
            .expect_err("cancelled send must fail");
        assert!(error.is_cancelled());
        assert_eq!(session.current().len(), 1);
    }

    #[test]
    fn cancellation_commits_partial_reply_with_partial_commit() {
        let features = ProviderFeatures::RESPONSE_STREAMING | ProviderFeatures::PARTIAL_COMMIT_ON_CANCEL;
        let (_, mut gateway) = gateway(
            MockProvider::new(vec![MockReply::Interrupted {
                text: "half an answer".to_string(),
                after_chunks: 2,
            }])
            .with_features(features),
        );
        let mut session = session_with(vec![Message::user("hi")]);

        let reply = send(&mut session, &mut gateway, cancel_signal(), &mut |_| {})
            .expect("partial reply should be kept");
        assert!(reply.partial);
        assert_eq!(reply.content, "half an ");
        assert_eq!(session.current().len(), 2);
    }

    #[test]
    fn pre_cancelled_run_commits_nothing_even_with_partial_commit() {
        let (_, mut gateway) = gateway(
            MockProvider::with_replies(["never seen"]).with_features(ProviderFeatures::all()),
        );
        let mut session = session_with(vec![Message::user("hi")]);
        let cancel = cancel_signal();
        request_cancel(&cancel);

        let error = send(&mut session, &mut gateway, cancel, &mut |_| {})
            .expect_err("cancelled send must fail");
        assert!(error.is_cancelled());
        assert_eq!(session.current().len(), 1);
    }

    #[test]
    fn names_and_attachments_are_stripped_when_undeclared() {
        let (provider, mut gateway) =
            gateway(MockProvider::with_replies(["ok"]).with_features(ProviderFeatures::empty()));
        let message = Message::user("look")
            .with_name("Ada")
            .with_attachment(Attachment::image("https://example.com/a.png"));
        let mut session = session_with(vec![message]);

        send(&mut session, &mut gateway, cancel_signal(), &mut |_| {}).expect("send should succeed");

        let request = &provider.requests()[0];
        assert!(!request.stream);
        assert_eq!(request.messages[0].name, None);
        assert!(request.messages[0].attachments.is_empty());
    }

    #[test]
    fn names_and_attachments_are_forwarded_when_declared() {
        let (provider, mut gateway) = gateway(MockProvider::with_replies(["ok"]));
        let message = Message::user("look")
            .with_name("Ada")
            .with_attachment(Attachment::audio("data:audio/wav;base64,AA=="));
        let mut session = session_with(vec![message]);

        send(&mut session, &mut gateway, cancel_signal(), &mut |_| {}).expect("send should succeed");

        let prompt = &provider.requests()[0].messages[0];
        assert_eq!(prompt.name.as_deref(), Some("Ada"));
        assert_eq!(prompt.attachments[0].kind, AttachmentKind::Audio);
    }

    #[test]
    fn unknown_attachment_is_an_error_for_attachment_capable_providers() {
        let (provider, mut gateway) = gateway(MockProvider::with_replies(["ok"]));
        let message = Message::user("look").with_attachment(Attachment::Unknown {
            kind: Some("hologram".to_string()),
            data: json!({}),
        });
        let mut session = session_with(vec![message]);

        let error = send(&mut session, &mut gateway, cancel_signal(), &mut |_| {})
            .expect_err("unknown attachment must fail");
        assert!(matches!(
            error,
            ThreadError::Generation(GenerationError::UnsupportedAttachment { ref kind, .. })
                if kind == "hologram"
        ));
        assert!(provider.requests().is_empty());
        assert_eq!(session.current().len(), 1);
    }

    #[test]
    fn usage_is_carried_on_the_reply() {
        let usage = Usage {
            prompt_tokens: Some(10),
            sampled_tokens: Some(2),
            cost_in_cents: Some(0.25),
        };
        let (_, mut gateway) = gateway(MockProvider::with_replies(["ok"]).with_usage(usage.clone()));
        let mut session = session_with(vec![Message::user("hi")]);

        let reply = send(&mut session, &mut gateway, cancel_signal(), &mut |_| {})
            .expect("send should succeed");
        assert_eq!(reply.usage, Some(usage));
    }

    #[test]
    fn params_are_validated_by_the_provider() {
        let (provider, mut gateway) = gateway(MockProvider::with_replies(["ok"]));

        gateway
            .set_param("temperature", json!(9.0))
            .expect("temperature should be accepted");
        assert_eq!(gateway.settings().params["temperature"], json!(2.0));

        let error = gateway
            .set_param("bogus", json!(1))
            .expect_err("unknown parameter must fail");
        assert!(matches!(error, GenerationError::InvalidParams(_)));
        assert!(!gateway.settings().params.contains_key("bogus"));

        let mut session = session_with(vec![Message::user("hi")]);
        send(&mut session, &mut gateway, cancel_signal(), &mut |_| {}).expect("send should succeed");
        assert_eq!(provider.requests()[0].params["temperature"], json!(2.0));

        assert_eq!(gateway.unset_param(Some("temperature")), 1);
        assert_eq!(gateway.unset_param(None), 0);
    }

    #[test]
    fn stream_toggle_requires_streaming_support() {
        let (_, mut gateway) =
            gateway(MockProvider::new(Vec::new()).with_features(ProviderFeatures::empty()));
        assert!(!gateway.settings().stream);
        assert!(matches!(
            gateway.set_stream(true),
            Err(GenerationError::StreamingUnsupported { .. })
        ));
        assert_eq!(gateway.set_stream(false), Ok(()));
    }

    #[test]
    fn model_selection_checks_the_provider_list() {
        let (_, mut gateway) = gateway(MockProvider::new(Vec::new()));
        assert_eq!(
            gateway
                .select_model("mock-large")
                .expect("listed model should be selectable")
                .model_id,
            "mock-large"
        );
        assert!(matches!(
            gateway.select_model("gpt-9"),
            Err(GenerationError::UnknownModel { .. })
        ));
        assert_eq!(gateway.profile().model_id, "mock-large");
    }
}
