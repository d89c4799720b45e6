//! Environment configuration for engine policies.

use std::env;

use tracing::warn;

use crate::policy::Policy;

pub const FORK_ON_RETRY_ENV: &str = "THREADKEEPER_FORK_ON_RETRY";
pub const ALLOW_EMPTY_MESSAGES_ENV: &str = "THREADKEEPER_ALLOW_EMPTY_MESSAGES";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Whether retrying in a named thread forks it first.
    pub fork_on_retry: Policy,
    /// Whether messages with no content may be added.
    pub allow_empty_messages: Policy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fork_on_retry: Policy::Always,
            allow_empty_messages: Policy::Never,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            fork_on_retry: env_policy(FORK_ON_RETRY_ENV).unwrap_or(defaults.fork_on_retry),
            allow_empty_messages: env_policy(ALLOW_EMPTY_MESSAGES_ENV)
                .unwrap_or(defaults.allow_empty_messages),
        }
    }
}

fn env_policy(key: &str) -> Option<Policy> {
    let value = env_string_opt(key)?;
    match value.parse() {
        Ok(policy) => Some(policy),
        Err(error) => {
            warn!(key, %error, "ignoring invalid policy");
            None
        }
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}
