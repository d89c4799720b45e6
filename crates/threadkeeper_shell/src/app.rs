use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chat_provider::{CancelSignal, ChatProvider, Usage};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use thread_store::{ThreadStore, ThreadStoreError};
use threadkeeper::range::{first, last};
use threadkeeper::{
    cancel_signal, retry, send, Attachment, Confirmation, CopyMode, Gateway, GenerationError,
    Reply, Session, Switched, Thread, ThreadError, ThreadKey,
};
use tracing::{debug, info, warn};

use crate::commands::{
    parse_command, split_word, AttachKind, Command, DeleteTarget, ParseError, HELP_TEXT,
};
use crate::config::{render_prompt, AccountConfig, PromptFields, ShellSettings};
use crate::macros::{self, MacroError, MAX_DEPTH};
use crate::providers::provider_for_id;

/// What the shell does around the engine: printing and yes/no questions.
pub trait HostOps {
    fn print(&mut self, text: &str);

    /// Shows part of a reply as it streams in.
    fn print_chunk(&mut self, chunk: &str);

    fn confirm(&mut self, question: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Thread(#[from] ThreadError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Store(#[from] ThreadStoreError),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("I/O error while {operation} {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{command}: no file given and none used before")]
    NoPath { command: &'static str },

    #[error("{0} is not a configured account")]
    UnknownAccount(String),

    #[error("{0}")]
    Provider(String),

    #[error("in macro {name:?}{}: {source}", at_line(.line))]
    Macro {
        name: String,
        line: Option<usize>,
        #[source]
        source: MacroError,
    },
}

fn at_line(line: &Option<usize>) -> String {
    line.map(|line| format!(", line {line}")).unwrap_or_default()
}

impl CommandError {
    fn io(operation: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }

    fn in_macro(name: &str, line: Option<usize>, source: MacroError) -> Self {
        Self::Macro {
            name: name.to_string(),
            line,
            source,
        }
    }
}

/// Running totals over every reply in the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostTracker {
    pub total_cents: f64,
    pub prompt_tokens: u64,
    pub sampled_tokens: u64,
    /// Some reply had no cost, or a request was cancelled.
    pub incomplete: bool,
}

impl CostTracker {
    pub fn record(&mut self, usage: Option<&Usage>) {
        let Some(usage) = usage else {
            self.incomplete = true;
            return;
        };
        match usage.cost_in_cents {
            Some(cost) => self.total_cents += cost,
            None => self.incomplete = true,
        }
        self.prompt_tokens += usage.prompt_tokens.unwrap_or_default();
        self.sampled_tokens += usage.sampled_tokens.unwrap_or_default();
    }

    pub fn mark_incomplete(&mut self) {
        self.incomplete = true;
    }

    #[must_use]
    pub fn cost_summary(&self) -> String {
        let marker = if self.incomplete { " (incomplete)" } else { "" };
        format!("session cost: {:.4}¢{marker}", self.total_cents)
    }
}

pub struct App {
    session: Session,
    gateway: Gateway,
    settings: ShellSettings,
    account: String,
    /// Gateways of accounts used before and switched away from. They keep
    /// their model and parameters.
    parked: BTreeMap<String, Gateway>,
    macro_stack: Vec<String>,
    cancel: CancelSignal,
    costs: CostTracker,
    last_path: Option<PathBuf>,
}

impl App {
    /// Starts on `settings.account`, served by `provider`.
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        settings: ShellSettings,
    ) -> Result<Self, GenerationError> {
        let mut gateway = Gateway::new(provider);
        if let Some(model) = settings.model.as_deref() {
            gateway.select_model(model)?;
        }

        Ok(Self {
            session: Session::new(),
            gateway,
            account: settings.account.clone(),
            settings,
            parked: BTreeMap::new(),
            macro_stack: Vec::new(),
            cancel: cancel_signal(),
            costs: CostTracker::default(),
            last_path: None,
        })
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    #[must_use]
    pub fn costs(&self) -> &CostTracker {
        &self.costs
    }

    #[must_use]
    pub fn last_path(&self) -> Option<&Path> {
        self.last_path.as_deref()
    }

    /// The flag raised to cancel the reply in flight.
    #[must_use]
    pub fn cancel_signal(&self) -> CancelSignal {
        Arc::clone(&self.cancel)
    }

    #[must_use]
    pub fn prompt(&self) -> String {
        let profile = self.gateway.profile();
        render_prompt(
            &self.settings.prompt,
            PromptFields {
                thread: self.session.current_key().name().unwrap_or_default(),
                model: &profile.model_id,
                provider: &profile.provider_id,
                account: &self.account,
            },
        )
    }

    /// Runs one input line, a command or a macro call, reporting any failure
    /// through `host`.
    pub fn handle_line(&mut self, line: &str, host: &mut dyn HostOps) -> Flow {
        match self.dispatch(line, host) {
            Ok(flow) => flow,
            Err(error) => {
                debug!(%error, "command failed");
                host.print(&format!("error: {error}"));
                Flow::Continue
            }
        }
    }

    fn dispatch(&mut self, line: &str, host: &mut dyn HostOps) -> Result<Flow, CommandError> {
        let (word, rest) = split_word(line);
        if let Some(definition) = self.settings.macros.get(word).cloned() {
            return self.run_macro(word, &definition, rest, host);
        }
        match parse_command(line)? {
            Some(command) => self.execute(command, host),
            None => Ok(Flow::Continue),
        }
    }

    /// Runs each line of a macro body. A failing line is reported and the
    /// rest of the body still runs; template errors stop the macro.
    fn run_macro(
        &mut self,
        name: &str,
        definition: &str,
        rest: &str,
        host: &mut dyn HostOps,
    ) -> Result<Flow, CommandError> {
        if self.macro_stack.iter().any(|running| running == name) {
            return Err(CommandError::in_macro(
                name,
                None,
                MacroError::Recursive(name.to_string()),
            ));
        }
        if self.macro_stack.len() >= MAX_DEPTH {
            return Err(CommandError::in_macro(name, None, MacroError::TooDeep));
        }
        let args =
            macros::split_arguments(rest).map_err(|source| CommandError::in_macro(name, None, source))?;

        self.macro_stack.push(name.to_string());
        let result = self.run_macro_body(name, definition, &args, host);
        self.macro_stack.pop();
        result
    }

    fn run_macro_body(
        &mut self,
        name: &str,
        definition: &str,
        args: &[String],
        host: &mut dyn HostOps,
    ) -> Result<Flow, CommandError> {
        for (line, template) in macros::macro_lines(definition) {
            let rendered = macros::expand(template, args, |key| self.macro_value(key))
                .map_err(|source| CommandError::in_macro(name, Some(line), source))?;
            debug!(macro_name = name, line, command = rendered.as_str(), "macro line");
            match self.dispatch(&rendered, host) {
                Ok(Flow::Quit) => return Ok(Flow::Quit),
                Ok(Flow::Continue) => {}
                Err(error) => host.print(&format!("error: {error}")),
            }
        }
        Ok(Flow::Continue)
    }

    fn macro_value(&self, key: &str) -> Option<String> {
        match key {
            "thread" => Some(
                self.session
                    .current_key()
                    .name()
                    .unwrap_or_default()
                    .to_string(),
            ),
            "model" => Some(self.gateway.profile().model_id),
            "account" => Some(self.account.clone()),
            _ => None,
        }
    }

    pub fn execute(&mut self, command: Command, host: &mut dyn HostOps) -> Result<Flow, CommandError> {
        match command {
            Command::Append { role, content } => {
                let policy = self.settings.engine.allow_empty_messages;
                let mut confirm = |question: &Confirmation| host.confirm(&question.to_string());
                self.session.append(role, content, policy, &mut confirm)?;
            }
            Command::Say(content) => {
                let policy = self.settings.engine.allow_empty_messages;
                let mut confirm = |question: &Confirmation| host.confirm(&question.to_string());
                self.session
                    .append(threadkeeper::Role::User, content, policy, &mut confirm)?;
                self.send(host)?;
            }
            Command::Send => self.send(host)?,
            Command::Retry => self.retry(host)?,
            Command::View(spec) => {
                let rendered = self.session.current().render(spec, true)?;
                if !rendered.is_empty() {
                    host.print(&rendered);
                }
            }
            Command::First(k) => {
                let thread = self.session.current();
                let span = first(k, thread.len()).map_err(ThreadError::from)?;
                host.print(&thread.render_span(span, true));
            }
            Command::Last(k) => {
                let thread = self.session.current();
                let span = last(k, thread.len()).map_err(ThreadError::from)?;
                host.print(&thread.render_span(span, true));
            }
            Command::Grep(pattern) => {
                let pattern = Regex::new(&pattern)?;
                let hits = self.session.current().grep(&pattern);
                if hits.is_empty() {
                    host.print("no matches");
                }
                for hit in hits {
                    host.print(&format!(
                        "{}: {}{}: {}",
                        hit.position, hit.indicators, hit.author, hit.preview
                    ));
                }
            }
            Command::Pop(position) => {
                let removed = self.session.current_mut()?.pop(position)?;
                host.print(&format!("removed {}", removed.render(false)));
            }
            Command::Clear => {
                let count = self.session.current_mut()?.clearable();
                if count == 0 {
                    host.print("no messages to clear");
                } else if host.confirm(&format!("Delete {count} message(s)?")) {
                    let cleared = self.session.current_mut()?.clear();
                    host.print(&format!("cleared {cleared} message(s)"));
                }
            }
            Command::Sticky { spec, sticky } => {
                let changed = self.session.current_mut()?.set_sticky(spec, sticky)?;
                let state = if sticky { "sticky" } else { "unsticky" };
                host.print(&format!("{changed} message(s) made {state}"));
            }
            Command::Rename { role, spec, name } => {
                let renamed = self
                    .session
                    .current_mut()?
                    .rename(role, spec, name.as_deref())?;
                host.print(&format!("renamed {renamed} message(s)"));
            }
            Command::Move { from, to } => {
                let (from, to) = self.session.current_mut()?.relocate(from, to)?;
                host.print(&format!("moved message {from} to {to}"));
            }
            Command::Copy { spec, dest, mode } => {
                let key = dest.clone().map_or(ThreadKey::Detached, ThreadKey::named);
                if mode == CopyMode::Overwrite {
                    let replaced = self.session.thread(&key).map_or(0, Thread::clearable);
                    if replaced > 0 && !host.confirm(&format!("Replace {replaced} message(s) in {key}?"))
                    {
                        return Ok(Flow::Continue);
                    }
                }
                let copied = self.session.copy(spec, dest.as_deref(), mode)?;
                host.print(&format!("copied {copied} message(s) to {key}"));
            }
            Command::Meta {
                position,
                key,
                value,
            } => self.meta(position, key, value, host)?,
            Command::Unmeta { position, key } => {
                let thread = self.session.current_mut()?;
                match key {
                    Some(key) => {
                        thread.unset_meta(position, &key)?;
                    }
                    None => {
                        let cleared = thread.clear_meta(position)?;
                        host.print(&format!("cleared {cleared} key(s)"));
                    }
                }
            }
            Command::Edit { position, content } => {
                self.session.current_mut()?.edit(position, content)?;
            }
            Command::Name { role, name } => {
                self.session.current_mut()?.set_default_name(role, name);
            }
            Command::Unname(role) => {
                let removed = self.session.current_mut()?.unset_default_name(role);
                host.print(&format!("removed {removed} default name(s)"));
            }
            Command::Attach { kind, source } => {
                let attachment = load_attachment(kind, &source)?;
                let position = self
                    .session
                    .current_mut()?
                    .attach(threadkeeper::Position::LAST, attachment)?;
                host.print(&format!("attached to message {position}"));
            }
            Command::Read { path, role } => {
                let content = fs::read_to_string(&path)
                    .map_err(|source| CommandError::io("reading", &path, source))?;
                let policy = self.settings.engine.allow_empty_messages;
                let mut confirm = |question: &Confirmation| host.confirm(&question.to_string());
                self.session.append(role, content, policy, &mut confirm)?;
            }
            Command::Write { path, position } => {
                let (_, message) = self.session.current().message(position)?;
                fs::write(&path, &message.content)
                    .map_err(|source| CommandError::io("writing", &path, source))?;
            }
            Command::Transcribe(path) => {
                let mut transcript = self.session.current().transcript();
                transcript.push('\n');
                fs::write(&path, transcript)
                    .map_err(|source| CommandError::io("writing", &path, source))?;
            }
            Command::Thread(name) => {
                let message = match self.session.switch(name.as_deref()) {
                    Switched::Detached => "switched to detached thread".to_string(),
                    Switched::Existing(name) => format!("switched to thread {name:?}"),
                    Switched::Created(name) => format!("created thread {name:?}"),
                };
                host.print(&message);
            }
            Command::Threads => self.list_threads(host),
            Command::Delete(DeleteTarget::Thread(name)) => {
                self.session.delete(&name)?;
                host.print(&format!("deleted thread {name:?}"));
            }
            Command::Delete(DeleteTarget::All) => {
                let count = self.session.named().len();
                if count > 0 && host.confirm(&format!("Delete all {count} named threads?")) {
                    let deleted = self.session.delete_all()?;
                    host.print(&format!("deleted {deleted} thread(s)"));
                }
            }
            Command::Save(path) => {
                let path = self.resolve_path("save", path)?;
                let saved = ThreadStore::new(&path).save(&mut self.session)?;
                host.print(&format!("saved {saved} thread(s) to {}", path.display()));
                self.last_path = Some(path);
            }
            Command::Load(path) => {
                let path = self.resolve_path("load", path)?;
                let threads = ThreadStore::new(&path).load()?;
                let loaded = self.session.load(threads)?;
                host.print(&format!("loaded {loaded} thread(s) from {}", path.display()));
                self.last_path = Some(path);
            }
            Command::Set { key, value } => self.gateway.set_param(key, value)?,
            Command::Unset(key) => {
                let removed = self.gateway.unset_param(key.as_deref());
                host.print(&format!("removed {removed} parameter(s)"));
            }
            Command::Stream(None) => {
                let state = if self.gateway.settings().stream { "on" } else { "off" };
                host.print(&format!("streaming is {state}"));
            }
            Command::Stream(Some(stream)) => self.gateway.set_stream(stream)?,
            Command::Model(None) => {
                let profile = self.gateway.profile();
                host.print(&format!("{} / {}", profile.provider_id, profile.model_id));
                if let Some(models) = self.gateway.provider().valid_models() {
                    host.print(&format!("available: {}", models.join(", ")));
                }
            }
            Command::Model(Some(model)) => {
                let profile = self.gateway.select_model(&model)?;
                host.print(&format!("using model {}", profile.model_id));
            }
            Command::Account(None) => {
                host.print(&format!("active account: {}", self.account));
                let others: Vec<&str> = self
                    .settings
                    .accounts
                    .keys()
                    .map(String::as_str)
                    .filter(|name| *name != self.account)
                    .collect();
                if !others.is_empty() {
                    host.print(&format!("available accounts: {}", others.join(", ")));
                }
            }
            Command::Account(Some(name)) => {
                self.switch_account(&name)?;
                host.print(&format!("switched to account {name:?}"));
            }
            Command::Help => host.print(HELP_TEXT),
            Command::Quit => return Ok(self.quit(host)),
        }

        Ok(Flow::Continue)
    }

    fn send(&mut self, host: &mut dyn HostOps) -> Result<(), CommandError> {
        self.cancel.store(false, Ordering::SeqCst);
        let stream = self.gateway.settings().stream;
        let mut streamed = false;
        let result = {
            let mut on_chunk = |chunk: &str| {
                if stream {
                    streamed = true;
                    host.print_chunk(chunk);
                }
            };
            send(
                &mut self.session,
                &mut self.gateway,
                Arc::clone(&self.cancel),
                &mut on_chunk,
            )
        };
        self.finish_reply(result, streamed, host)
    }

    fn retry(&mut self, host: &mut dyn HostOps) -> Result<(), CommandError> {
        self.cancel.store(false, Ordering::SeqCst);
        let fork_policy = self.settings.engine.fork_on_retry;
        let stream = self.gateway.settings().stream;
        let host = RefCell::new(host);
        let mut streamed = false;

        let result = {
            let mut confirm =
                |question: &Confirmation| host.borrow_mut().confirm(&question.to_string());
            let mut on_chunk = |chunk: &str| {
                if stream {
                    streamed = true;
                    host.borrow_mut().print_chunk(chunk);
                }
            };
            retry(
                &mut self.session,
                &mut self.gateway,
                fork_policy,
                &mut confirm,
                Arc::clone(&self.cancel),
                &mut on_chunk,
            )
        };

        let host = host.into_inner();
        match result {
            Ok(retried) => {
                if let Some(name) = &retried.forked_into {
                    host.print(&format!("forked into thread {name:?}"));
                }
                self.finish_reply(Ok(retried.reply), streamed, host)
            }
            Err(error) => self.finish_reply(Err(error), streamed, host),
        }
    }

    fn finish_reply(
        &mut self,
        result: Result<Reply, ThreadError>,
        streamed: bool,
        host: &mut dyn HostOps,
    ) -> Result<(), CommandError> {
        if streamed {
            host.print_chunk("\n");
        }

        let reply = match result {
            Ok(reply) => reply,
            Err(error) => {
                if error.is_cancelled() {
                    self.costs.mark_incomplete();
                }
                return Err(error.into());
            }
        };

        if !streamed {
            host.print(&reply.content);
        }
        if reply.partial {
            self.costs.mark_incomplete();
            host.print("(interrupted; partial reply kept)");
        }
        self.costs.record(reply.usage.as_ref());

        if self.settings.show_token_usage {
            if let Some(usage) = &reply.usage {
                host.print(&format!(
                    "tokens: {} prompt, {} sampled",
                    usage.prompt_tokens.unwrap_or_default(),
                    usage.sampled_tokens.unwrap_or_default()
                ));
            }
        }
        if self.settings.show_cost {
            host.print(&self.costs.cost_summary());
        }
        Ok(())
    }

    fn meta(
        &mut self,
        position: threadkeeper::Position,
        key: Option<String>,
        value: Option<Value>,
        host: &mut dyn HostOps,
    ) -> Result<(), CommandError> {
        match (key, value) {
            (None, _) => {
                let (_, metadata) = self.session.current().metadata(position)?;
                host.print(&format!("{:#}", Value::Object(metadata.clone())));
            }
            (Some(key), None) => {
                let (index, metadata) = self.session.current().metadata(position)?;
                let value = metadata
                    .get(&key)
                    .ok_or(ThreadError::MissingMetadata {
                        position: index,
                        key: key.clone(),
                    })?;
                host.print(&format!("{key}: {value:#}"));
            }
            (Some(key), Some(value)) => {
                self.session.current_mut()?.set_meta(position, key, value)?;
            }
        }
        Ok(())
    }

    fn list_threads(&self, host: &mut dyn HostOps) {
        let listing = self.session.list();
        let current = self.session.current_key();
        for (name, count) in &listing.named {
            let marker = if current.name() == Some(name.as_str()) {
                "*"
            } else {
                " "
            };
            host.print(&format!("{marker} {name}: {count} message(s)"));
        }
        let marker = if current == &ThreadKey::Detached {
            "*"
        } else {
            " "
        };
        host.print(&format!(
            "{marker} (detached): {} message(s)",
            listing.detached
        ));
    }

    fn switch_account(&mut self, name: &str) -> Result<(), CommandError> {
        if name == self.account {
            return Ok(());
        }
        let config = self
            .settings
            .accounts
            .get(name)
            .ok_or_else(|| CommandError::UnknownAccount(name.to_string()))?;
        let gateway = match self.parked.remove(name) {
            Some(gateway) => gateway,
            None => open_account(config)?,
        };

        let previous = mem::replace(&mut self.gateway, gateway);
        let previous_name = mem::replace(&mut self.account, name.to_string());
        self.parked.insert(previous_name, previous);
        info!(account = name, "switched account");
        Ok(())
    }

    fn resolve_path(
        &self,
        command: &'static str,
        path: Option<PathBuf>,
    ) -> Result<PathBuf, CommandError> {
        path.or_else(|| self.last_path.clone())
            .ok_or(CommandError::NoPath { command })
    }

    fn quit(&mut self, host: &mut dyn HostOps) -> Flow {
        if self.session.has_unsaved_changes()
            && !host.confirm("There are unsaved changes. Quit anyway?")
        {
            return Flow::Continue;
        }
        Flow::Quit
    }
}

fn open_account(config: &AccountConfig) -> Result<Gateway, CommandError> {
    let provider = provider_for_id(&config.provider).map_err(CommandError::Provider)?;
    let mut gateway = Gateway::new(provider);
    if let Some(model) = config.model.as_deref() {
        gateway.select_model(model)?;
    }
    Ok(gateway)
}

/// Reads a local file into a `data:` URL, or takes `source` as a URL.
fn load_attachment(kind: AttachKind, source: &str) -> Result<Attachment, CommandError> {
    let path = Path::new(source);
    if !path.is_file() {
        if !source.contains("://") && !source.starts_with("data:") {
            warn!(source, "attachment source is neither a file nor a URL");
        }
        return Ok(match kind {
            AttachKind::Image { detail } => Attachment::Image {
                url: source.to_string(),
                detail,
            },
            AttachKind::Audio => Attachment::audio(source),
        });
    }

    let attachment = match kind {
        AttachKind::Image { detail } => Attachment::image_from_path(path, detail),
        AttachKind::Audio => Attachment::audio_from_path(path),
    };
    attachment.map_err(|source| CommandError::io("reading", path, source))
}
