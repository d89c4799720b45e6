//! Regenerating the last reply, optionally on a fork of the current thread.

use chat_provider::CancelSignal;
use tracing::{info, warn};

use crate::error::ThreadError;
use crate::gateway::{self, Gateway, Reply};
use crate::message::Role;
use crate::policy::{Confirm, Confirmation, Policy};
use crate::range::Position;
use crate::session::{Session, ThreadKey};

/// Result of a successful retry.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried {
    pub reply: Reply,
    /// Name of the thread created to hold the new reply, if any.
    pub forked_into: Option<String>,
}

/// Next free fork name for `name`.
///
/// A trailing number is incremented (`draft7` becomes `draft8`), otherwise
/// `2` is appended. Names made only of digits get `2` appended as well.
/// The counter keeps climbing past names for which `exists` holds.
#[must_use]
pub fn fork_name(name: &str, exists: impl Fn(&str) -> bool) -> String {
    let digits_at = name
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(index, _)| index);

    let (base, mut counter) = match digits_at {
        Some(index) if index > 0 => match name[index..].parse::<u64>() {
            Ok(number) => (&name[..index], number.saturating_add(1)),
            Err(_) => (name, 2),
        },
        _ => (name, 2),
    };

    loop {
        let candidate = format!("{base}{counter}");
        if !exists(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Discards the last assistant message of the current thread and generates
/// a replacement.
///
/// On a named thread `fork_policy` decides whether the regeneration happens
/// on a fork so the original reply survives. If generation fails or is
/// cancelled, everything is rolled back: the discarded message returns, any
/// fork is deleted, and the original thread is current again.
pub fn retry(
    session: &mut Session,
    gateway: &mut Gateway,
    fork_policy: Policy,
    confirm: &mut dyn Confirm,
    cancel: CancelSignal,
    on_chunk: &mut dyn FnMut(&str),
) -> Result<Retried, ThreadError> {
    let thread = session.current_mut()?;
    let position = thread.len();
    match thread.last() {
        Some(message) if message.role == Role::Assistant && message.sticky => {
            return Err(ThreadError::StickyViolation { position });
        }
        Some(message) if message.role == Role::Assistant => {}
        _ => return Err(ThreadError::NothingToRetry),
    }

    let original = session.current_key().clone();
    let forked_into = match &original {
        ThreadKey::Named(name) => {
            let new_name = fork_name(name, |candidate| session.contains(candidate));
            let question = Confirmation::Fork {
                new_name: new_name.clone(),
            };
            fork_policy.decide(confirm, &question).then_some(new_name)
        }
        ThreadKey::Detached => None,
    };

    let snapshot = match &forked_into {
        Some(new_name) => {
            session.switch(Some(new_name));
            info!(from = %original, into = new_name.as_str(), "forked thread for retry");
            None
        }
        None => Some(session.current().clone()),
    };

    session.current_mut()?.pop(Position::LAST)?;

    match gateway::send(session, gateway, cancel, on_chunk) {
        Ok(reply) => Ok(Retried { reply, forked_into }),
        Err(error) => {
            warn!(thread = %original, %error, "retry failed; rolling back");
            match (forked_into, snapshot) {
                (Some(fork), _) => {
                    session.delete(&fork)?;
                    session.switch(original.name());
                }
                (None, Some(snapshot)) => *session.current_mut()? = snapshot,
                (None, None) => {}
            }
            Err(error)
        }
    }
}
