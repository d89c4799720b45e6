//! Three-way policies and the injected yes/no capability behind `Ask`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::message::Role;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    #[default]
    Always,
    Ask,
    Never,
}

impl Policy {
    /// Resolves the policy to a decision, consulting `confirm` only for `Ask`.
    pub fn decide(self, confirm: &mut dyn Confirm, question: &Confirmation) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Ask => confirm.confirm(question),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::Ask => "ask",
            Self::Never => "never",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePolicyError(String);

impl fmt::Display for ParsePolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} is not one of always, ask, never", self.0)
    }
}

impl std::error::Error for ParsePolicyError {}

impl FromStr for Policy {
    type Err = ParsePolicyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "ask" => Ok(Self::Ask),
            "never" => Ok(Self::Never),
            _ => Err(ParsePolicyError(value.to_string())),
        }
    }
}

/// A question the engine may put to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// Fork the current thread into `new_name` before regenerating?
    Fork { new_name: String },
    /// Add a message with no content?
    EmptyMessage { role: Role },
}

impl fmt::Display for Confirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fork { new_name } => write!(f, "Create thread {new_name:?}?"),
            Self::EmptyMessage { role } => write!(f, "Add empty {role} message?"),
        }
    }
}

/// Answers yes/no questions on behalf of the user.
pub trait Confirm {
    fn confirm(&mut self, question: &Confirmation) -> bool;
}

impl<F> Confirm for F
where
    F: FnMut(&Confirmation) -> bool,
{
    fn confirm(&mut self, question: &Confirmation) -> bool {
        self(question)
    }
}
