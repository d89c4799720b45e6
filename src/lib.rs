//! Conversation thread engine for interactive chat sessions.
//!
//! A [`Session`] owns any number of named [`Thread`]s plus one detached
//! thread, and tracks which of them is current. Threads are ordered message
//! sequences addressed with one-based, end-relative ranges ([`RangeSpec`]).
//! Sticky messages survive deletion and bulk renames.
//!
//! # Public API Overview
//! - Build and annotate messages with [`Message`], [`Role`], and [`Attachment`].
//! - Resolve textual ranges such as `"2 -1"` or `"."` with [`RangeSpec`] and [`resolve`].
//! - Mutate threads through [`Session::current_mut`]; a thread with a reply in
//!   flight reports [`ThreadError::ThreadBusy`].
//! - Generate replies with [`send`] over a [`Gateway`] wrapping any
//!   [`chat_provider::ChatProvider`], and regenerate them with [`retry`].
//!
//! Every fallible operation is atomic: on error the session is unchanged.

pub mod config;
pub mod error;
pub mod gateway;
pub mod message;
pub mod policy;
pub mod range;
pub mod retry;
pub mod session;
pub mod thread;

pub use crate::config::EngineConfig;
pub use crate::error::{GenerationError, RangeError, ThreadError};
pub use crate::gateway::{cancel_signal, request_cancel, send, Gateway, GenerationSettings, Reply};
pub use crate::message::{Attachment, Message, Metadata, Role};
pub use crate::policy::{Confirm, Confirmation, Policy};
pub use crate::range::{resolve, Position, RangeSpec, Span};
pub use crate::retry::{fork_name, retry, Retried};
pub use crate::session::{CopyMode, PendingGeneration, Session, Switched, ThreadKey, ThreadListing};
pub use crate::thread::{GrepHit, Thread};
