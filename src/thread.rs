//! An ordered, mutable conversation plus its per-role default names.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;

use crate::error::ThreadError;
use crate::message::{Attachment, Message, Metadata, Role};
use crate::range::{self, Position, RangeSpec, Span};

/// Characters of context shown on either side of a grep match.
pub const GREP_CONTEXT_CHARS: usize = 40;

/// One message matched by [`Thread::grep`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrepHit {
    pub position: usize,
    pub indicators: String,
    pub author: String,
    /// Content around the first match with every match wrapped in `[...]`.
    pub preview: String,
}

#[derive(Debug, Clone, Default)]
pub struct Thread {
    messages: Vec<Message>,
    default_names: BTreeMap<Role, String>,
    dirty: bool,
}

impl Thread {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a thread from stored parts. The result is considered saved.
    #[must_use]
    pub fn from_parts(messages: Vec<Message>, default_names: BTreeMap<Role, String>) -> Self {
        Self {
            messages,
            default_names,
            dirty: false,
        }
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Message at one-based `position`.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<&Message> {
        position.checked_sub(1).and_then(|index| self.messages.get(index))
    }

    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    #[must_use]
    pub fn default_names(&self) -> &BTreeMap<Role, String> {
        &self.default_names
    }

    /// True when the thread changed since it was last saved or loaded.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn span(&self, spec: RangeSpec) -> Result<Span, ThreadError> {
        Ok(spec.resolve(self.len())?)
    }

    /// Resolves a single position, reporting an empty thread as such.
    pub fn locate(&self, position: Position) -> Result<usize, ThreadError> {
        if self.messages.is_empty() {
            return Err(ThreadError::EmptySequence);
        }
        Ok(RangeSpec::Single(position).resolve(self.len())?.lo())
    }

    /// Looks up one message, returning its resolved position as well.
    pub fn message(&self, position: Position) -> Result<(usize, &Message), ThreadError> {
        let position = self.locate(position)?;
        Ok((position, &self.messages[position - 1]))
    }

    /// Appends `message`, naming it after the role's default name when it has
    /// no name of its own. Returns the new message's position.
    pub fn append(&mut self, mut message: Message) -> usize {
        if message.name.is_none() {
            message.name = self.default_names.get(&message.role).cloned();
        }
        self.messages.push(message);
        self.dirty = true;
        self.messages.len()
    }

    /// Appends copies verbatim, keeping their names and flags.
    pub fn extend_verbatim(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        let before = self.messages.len();
        self.messages.extend(messages);
        let added = self.messages.len() - before;
        if added > 0 {
            self.dirty = true;
        }
        added
    }

    /// Removes and returns one message.
    pub fn pop(&mut self, position: Position) -> Result<Message, ThreadError> {
        let position = self.locate(position)?;
        if self.messages[position - 1].sticky {
            return Err(ThreadError::StickyViolation { position });
        }
        self.dirty = true;
        Ok(self.messages.remove(position - 1))
    }

    /// Removes every non-sticky message and returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let before = self.messages.len();
        self.messages.retain(|message| message.sticky);
        let removed = before - self.messages.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    /// Number of messages [`Thread::clear`] would remove.
    #[must_use]
    pub fn clearable(&self) -> usize {
        self.messages.iter().filter(|message| !message.sticky).count()
    }

    /// Sets the sticky flag across a range; returns how many flags changed.
    pub fn set_sticky(&mut self, spec: RangeSpec, sticky: bool) -> Result<usize, ThreadError> {
        let span = self.span(spec)?;
        let mut changed = 0;
        for message in &mut self.messages[span.indices()] {
            if message.sticky != sticky {
                message.sticky = sticky;
                changed += 1;
            }
        }
        if changed > 0 {
            self.dirty = true;
        }
        Ok(changed)
    }

    /// Names (or with `None`, un-names) the non-sticky `role` messages in range.
    pub fn rename(
        &mut self,
        role: Role,
        spec: RangeSpec,
        name: Option<&str>,
    ) -> Result<usize, ThreadError> {
        let span = self.span(spec)?;
        let mut renamed = 0;
        for message in &mut self.messages[span.indices()] {
            if message.role == role && !message.sticky {
                message.name = name.map(str::to_string);
                renamed += 1;
            }
        }
        if renamed > 0 {
            self.dirty = true;
        }
        Ok(renamed)
    }

    /// Moves the first message of the range to its end, shifting the rest
    /// back by one.
    pub fn move_span(&mut self, spec: RangeSpec) -> Result<Span, ThreadError> {
        let span = self.span(spec)?;
        self.shift(span.lo(), span.hi())?;
        Ok(span)
    }

    /// Moves one message from `from` to `to` in either direction.
    pub fn relocate(&mut self, from: Position, to: Position) -> Result<(usize, usize), ThreadError> {
        if self.messages.is_empty() {
            return Err(ThreadError::EmptySequence);
        }
        let from = range::resolve_position(from, self.len(), true)?;
        let to = range::resolve_position(to, self.len(), false)?;
        self.shift(from, to)?;
        Ok((from, to))
    }

    fn shift(&mut self, from: usize, to: usize) -> Result<(), ThreadError> {
        if from == to {
            return Ok(());
        }
        if self.messages[from - 1].sticky {
            return Err(ThreadError::StickyViolation { position: from });
        }
        let message = self.messages.remove(from - 1);
        self.messages.insert(to - 1, message);
        self.dirty = true;
        Ok(())
    }

    /// Deep copies of every message in range.
    pub fn copy_range(&self, spec: RangeSpec) -> Result<Vec<Message>, ThreadError> {
        let span = self.span(spec)?;
        Ok(self.messages[span.indices()].to_vec())
    }

    pub fn metadata(&self, position: Position) -> Result<(usize, &Metadata), ThreadError> {
        let (position, message) = self.message(position)?;
        Ok((position, &message.metadata))
    }

    /// Sets one metadata key, returning the previous value if any.
    pub fn set_meta(
        &mut self,
        position: Position,
        key: impl Into<String>,
        value: Value,
    ) -> Result<Option<Value>, ThreadError> {
        let position = self.locate(position)?;
        let previous = self.messages[position - 1]
            .metadata
            .insert(key.into(), value);
        self.dirty = true;
        Ok(previous)
    }

    pub fn unset_meta(&mut self, position: Position, key: &str) -> Result<Value, ThreadError> {
        let position = self.locate(position)?;
        let removed = self.messages[position - 1]
            .metadata
            .remove(key)
            .ok_or_else(|| ThreadError::MissingMetadata {
                position,
                key: key.to_string(),
            })?;
        self.dirty = true;
        Ok(removed)
    }

    /// Drops every metadata key on one message; returns how many were set.
    pub fn clear_meta(&mut self, position: Position) -> Result<usize, ThreadError> {
        let position = self.locate(position)?;
        let metadata = &mut self.messages[position - 1].metadata;
        let cleared = metadata.len();
        metadata.clear();
        if cleared > 0 {
            self.dirty = true;
        }
        Ok(cleared)
    }

    /// Replaces one message's content, returning the old content.
    pub fn edit(
        &mut self,
        position: Position,
        content: impl Into<String>,
    ) -> Result<String, ThreadError> {
        let position = self.locate(position)?;
        let old = std::mem::replace(&mut self.messages[position - 1].content, content.into());
        self.dirty = true;
        Ok(old)
    }

    /// Adds an attachment to one message and returns that message's position.
    pub fn attach(&mut self, position: Position, attachment: Attachment) -> Result<usize, ThreadError> {
        let position = self.locate(position)?;
        self.messages[position - 1].attachments.push(attachment);
        self.dirty = true;
        Ok(position)
    }

    /// Binds a default name for future messages of `role`. Existing messages
    /// are left alone.
    pub fn set_default_name(&mut self, role: Role, name: impl Into<String>) {
        self.default_names.insert(role, name.into());
        self.dirty = true;
    }

    /// Drops the default name for `role`, or for every role when `None`.
    /// Returns how many bindings were removed.
    pub fn unset_default_name(&mut self, role: Option<Role>) -> usize {
        let removed = match role {
            Some(role) => usize::from(self.default_names.remove(&role).is_some()),
            None => {
                let count = self.default_names.len();
                self.default_names.clear();
                count
            }
        };
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    /// Finds messages whose content matches `pattern`. Empty matches do not count.
    #[must_use]
    pub fn grep(&self, pattern: &Regex) -> Vec<GrepHit> {
        self.messages
            .iter()
            .enumerate()
            .filter_map(|(index, message)| {
                let first = pattern
                    .find_iter(&message.content)
                    .find(|found| !found.is_empty())?;
                Some(GrepHit {
                    position: index + 1,
                    indicators: message.indicators(),
                    author: message.author().to_string(),
                    preview: grep_preview(&message.content, first.start(), first.end(), pattern),
                })
            })
            .collect()
    }

    /// Transcript of a range, one message per line.
    pub fn render(&self, spec: RangeSpec, display_indicators: bool) -> Result<String, ThreadError> {
        if self.messages.is_empty() && spec == RangeSpec::Whole {
            return Ok(String::new());
        }
        let span = self.span(spec)?;
        Ok(self.render_span(span, display_indicators))
    }

    #[must_use]
    pub fn render_span(&self, span: Span, display_indicators: bool) -> String {
        self.messages[span.indices()]
            .iter()
            .map(|message| message.render(display_indicators))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Plain transcript of the whole thread without state indicators.
    #[must_use]
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|message| message.render(false))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn grep_preview(content: &str, start: usize, end: usize, pattern: &Regex) -> String {
    let before: usize = content[..start]
        .chars()
        .rev()
        .take(GREP_CONTEXT_CHARS)
        .map(char::len_utf8)
        .sum();
    let after: usize = content[end..]
        .chars()
        .take(GREP_CONTEXT_CHARS)
        .map(char::len_utf8)
        .sum();
    let (from, to) = (start - before, end + after);

    let mut preview = String::new();
    if from > 0 {
        preview.push_str("...");
    }
    // Matches come from the whole content; ones cut by the window edge are
    // bracketed up to the edge.
    let mut cursor = from;
    for found in pattern.find_iter(content).filter(|found| !found.is_empty()) {
        if found.end() <= from {
            continue;
        }
        if found.start() >= to {
            break;
        }
        let (lo, hi) = (found.start().max(from), found.end().min(to));
        preview.push_str(&content[cursor..lo]);
        preview.push('[');
        preview.push_str(&content[lo..hi]);
        preview.push(']');
        cursor = hi;
    }
    preview.push_str(&content[cursor..to]);
    if to < content.len() {
        preview.push_str("...");
    }
    preview
}
