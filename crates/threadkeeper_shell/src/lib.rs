//! Line-oriented shell over the `threadkeeper` engine.
//!
//! ## Provider bootstrap
//!
//! The provider is chosen by id, from `--provider`, the config file's
//! `provider` field, or `THREADKEEPER_PROVIDER`, in that order. `mock` is the
//! only built-in provider and the default; it replies deterministically and
//! streams word by word.
//!
//! ## Accounts
//!
//! The config file may name several accounts, each a provider with an
//! optional model. The shell starts on `--account`, else `default`, else the
//! first account by name, and `account <name>` switches between them. Each
//! account keeps its own model and parameters for the rest of the session.
//!
//! ## Configuration
//!
//! An optional JSON file (`--config` or `THREADKEEPER_CONFIG`) may set:
//!
//! ```json
//! {
//!   "provider": "mock",
//!   "model": "mock-large",
//!   "prompt": "{provider}:{thread}> ",
//!   "fork_on_retry": "ask",
//!   "allow_empty_messages": "never",
//!   "show_cost": true,
//!   "show_token_usage": false,
//!   "accounts": {
//!     "default": {"provider": "mock"},
//!     "large": {"provider": "mock", "model": "mock-large"}
//!   },
//!   "macros": {
//!     "ask": "thread {1}\nsay {2?hello}"
//!   }
//! }
//! ```
//!
//! Unknown fields are rejected, and so are macros named after a built-in
//! command. See [`macros`] for the template syntax. File values override the environment
//! (`THREADKEEPER_FORK_ON_RETRY`, `THREADKEEPER_ALLOW_EMPTY_MESSAGES`) and
//! command-line flags override both.
//!
//! ## Logging
//!
//! `THREADKEEPER_LOG` holds a `tracing` filter (default `warn`). Output goes
//! to stderr, or is appended to `THREADKEEPER_LOG_FILE` when set.

pub mod app;
pub mod commands;
pub mod config;
pub mod logging;
pub mod macros;
pub mod providers;
