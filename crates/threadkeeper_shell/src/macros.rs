//! User-defined macros: named command sequences from the config file.
//!
//! A macro body is one command per line. Blank lines and lines starting with
//! `#` are skipped. Each line is a template whose `{...}` fields are filled
//! before the command runs:
//!
//! - `{1}`, `{2}`, ... the macro's positional arguments, split like a shell
//!   would split them.
//! - `{*}` every argument, re-quoted for a shell.
//! - `{thread}`, `{model}`, `{account}` the shell's current state.
//! - `{name?fallback}` uses `fallback` when `name` cannot be filled.
//!
//! `{{` and `}}` stand for literal braces. Lines starting with `@` are
//! directives; none are defined yet, so they are rejected.

use thiserror::Error;

/// How many macros may be running inside one another.
pub const MAX_DEPTH: usize = 10;

const DIRECTIVE_PREFIX: char = '@';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MacroError {
    #[error("invalid argument index {0:?}")]
    InvalidIndex(String),

    #[error("missing positional argument {0}")]
    MissingArgument(usize),

    #[error("undefined name {0:?}")]
    UndefinedName(String),

    #[error("attribute and item access are not supported in {0:?}")]
    UnsupportedField(String),

    #[error("invalid format string: {0}")]
    Format(&'static str),

    #[error("unknown directive {0:?}")]
    UnknownDirective(String),

    #[error("could not parse macro arguments")]
    Arguments,

    #[error("recursive invocation of macro {0:?}")]
    Recursive(String),

    #[error("macros nested more than {MAX_DEPTH} deep")]
    TooDeep,
}

/// The command templates of a macro body, numbered from 1.
pub fn macro_lines(definition: &str) -> impl Iterator<Item = (usize, &str)> {
    definition
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .enumerate()
        .map(|(index, line)| (index + 1, line))
}

/// Splits macro arguments the way a POSIX shell would.
pub fn split_arguments(text: &str) -> Result<Vec<String>, MacroError> {
    shlex::split(text).ok_or(MacroError::Arguments)
}

/// Fills one template line. `lookup` answers the named fields.
pub fn expand<F>(template: &str, args: &[String], lookup: F) -> Result<String, MacroError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(directive) = template.strip_prefix(DIRECTIVE_PREFIX) {
        let keyword = directive.split_whitespace().next().unwrap_or_default();
        return Err(MacroError::UnknownDirective(keyword.to_string()));
    }

    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(MacroError::Format("single '}' encountered")),
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') => return Err(MacroError::Format("unexpected '{' in field")),
                        Some(ch) => field.push(ch),
                        None => return Err(MacroError::Format("expected '}' before end of string")),
                    }
                }
                out.push_str(&fill(&field, args, &lookup)?);
            }
            ch => out.push(ch),
        }
    }
    Ok(out)
}

fn fill<F>(field: &str, args: &[String], lookup: &F) -> Result<String, MacroError>
where
    F: Fn(&str) -> Option<String>,
{
    let (key, fallback) = match field.split_once('?') {
        Some((key, fallback)) => (key, Some(fallback)),
        None => (field, None),
    };
    if key.contains(['.', '[']) {
        return Err(MacroError::UnsupportedField(field.to_string()));
    }

    match (value(key, args, lookup), fallback) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(fallback)) => Ok(fallback.to_string()),
        (Err(error), None) => Err(error),
    }
}

fn value<F>(key: &str, args: &[String], lookup: &F) -> Result<String, MacroError>
where
    F: Fn(&str) -> Option<String>,
{
    if key == "*" {
        return shlex::try_join(args.iter().map(String::as_str))
            .map_err(|_| MacroError::Format("argument cannot be quoted"));
    }
    if key.is_empty() || key.chars().all(|ch| ch.is_ascii_digit()) {
        let index = key
            .parse::<usize>()
            .ok()
            .filter(|index| *index >= 1)
            .ok_or_else(|| MacroError::InvalidIndex(key.to_string()))?;
        return args
            .get(index - 1)
            .cloned()
            .ok_or(MacroError::MissingArgument(index));
    }
    lookup(key).ok_or_else(|| MacroError::UndefinedName(key.to_string()))
}
