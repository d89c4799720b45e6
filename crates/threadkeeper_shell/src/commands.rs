use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;
use threadkeeper::{CopyMode, Position, RangeError, RangeSpec, Role};

/// What an `image`/`audio` command attaches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachKind {
    Image { detail: Option<String> },
    Audio,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    Thread(String),
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Append { role: Role, content: String },
    Say(String),
    Send,
    Retry,
    View(RangeSpec),
    First(usize),
    Last(usize),
    Grep(String),
    Pop(Position),
    Clear,
    Sticky { spec: RangeSpec, sticky: bool },
    Rename {
        role: Role,
        spec: RangeSpec,
        name: Option<String>,
    },
    Move { from: Position, to: Position },
    Copy {
        spec: RangeSpec,
        dest: Option<String>,
        mode: CopyMode,
    },
    Meta {
        position: Position,
        key: Option<String>,
        value: Option<Value>,
    },
    Unmeta { position: Position, key: Option<String> },
    Edit { position: Position, content: String },
    Name { role: Role, name: String },
    Unname(Option<Role>),
    Attach { kind: AttachKind, source: String },
    Read { path: PathBuf, role: Role },
    Write { path: PathBuf, position: Position },
    Transcribe(PathBuf),
    Thread(Option<String>),
    Threads,
    Delete(DeleteTarget),
    Save(Option<PathBuf>),
    Load(Option<PathBuf>),
    Set { key: String, value: Value },
    Unset(Option<String>),
    Stream(Option<bool>),
    Model(Option<String>),
    Account(Option<String>),
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown command: {0} (try help)")]
    UnknownCommand(String),

    #[error("{command}: missing {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("{command}: {reason}")]
    InvalidArgument {
        command: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Range(#[from] RangeError),
}

impl ParseError {
    fn invalid(command: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            command,
            reason: reason.into(),
        }
    }
}

pub const HELP_TEXT: &str = "\
Messages:
  user|assistant|system [text]   append a message to the current thread
  say <text>                     append a user message, then send
  send                           ask the provider for the next reply
  retry                          regenerate the last assistant reply
  read <path> [role]             append a file's content as a message
  edit [pos] <text>              replace a message's content (default last)
  pop [pos]                      delete one message (default last)
  clear                          delete every non-sticky message
Viewing:
  view [range]                   show messages (default all)
  first [k] | last [k]           show the first/last k messages
  grep <regex>                   search message content
Annotations:
  sticky|unsticky [range]        protect messages from deletion (default last)
  rename <role> [range] [name]   rename messages of a role (no name clears)
  name <role> <name>             default name for new messages of a role
  unname [role]                  drop one or all default names
  meta [pos] [key [json]]        show or set message metadata
  unmeta [pos] [key]             delete one key or all metadata
  image <path|url> [detail]      attach an image to the last message
  audio <path|url>               attach audio to the last message
Threads:
  thread [name]                  switch to or create a thread (none: detached)
  threads                        list threads
  delete [name|*]                delete one thread, or every named thread
  move <from> <to>               move one message
  copy|slice <range> [thread]    copy messages into a thread (slice replaces)
  save [path] | load [path]      save or load named threads
  write <path> [pos]             write one message's content to a file
  transcribe <path>              write the thread as plain text
Provider:
  set <key> <json>               set an API parameter
  unset [key]                    drop one or every API parameter
  stream [on|off]                toggle streaming
  model [id]                     show or select the model
  account [name]                 show or switch the configured account
  <macro> [args]                 run a macro from the config file
  help | quit

Ranges are one or two positions: 1 is the first message, -1 the last, and
'.' the edge (or, alone, the whole thread).";

/// Every built-in command word. Macros may not reuse these.
pub const COMMAND_NAMES: &[&str] = &[
    "user", "assistant", "system", "say", "send", "retry", "view", "first", "last", "grep",
    "pop", "clear", "sticky", "unsticky", "rename", "move", "copy", "slice", "meta", "unmeta",
    "edit", "name", "unname", "image", "audio", "read", "write", "transcribe", "thread",
    "threads", "delete", "save", "load", "set", "unset", "stream", "model", "account", "help",
    "quit", "exit",
];

#[must_use]
pub fn is_command(word: &str) -> bool {
    COMMAND_NAMES.contains(&word)
}

/// Splits a line into its first word and the trimmed remainder.
#[must_use]
pub fn split_word(line: &str) -> (&str, &str) {
    let trimmed = line.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (trimmed, ""),
    }
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse_command(input: &str) -> Result<Option<Command>, ParseError> {
    let (word, rest) = split_word(input);
    if word.is_empty() {
        return Ok(None);
    }
    let args: Vec<&str> = rest.split_whitespace().collect();

    let command = match word {
        "user" => append(Role::User, rest),
        "assistant" => append(Role::Assistant, rest),
        "system" => append(Role::System, rest),
        "say" => Command::Say(required_text("say", "text", rest)?),
        "send" => Command::Send,
        "retry" => Command::Retry,
        "view" => Command::View(range_or(&args, RangeSpec::Whole)?),
        "first" => Command::First(count("first", &args)?),
        "last" => Command::Last(count("last", &args)?),
        "grep" => Command::Grep(required_text("grep", "pattern", rest)?),
        "pop" => Command::Pop(position_or_last(&args)?),
        "clear" => Command::Clear,
        "sticky" => Command::Sticky {
            spec: range_or(&args, Position::LAST.into())?,
            sticky: true,
        },
        "unsticky" => Command::Sticky {
            spec: range_or(&args, Position::LAST.into())?,
            sticky: false,
        },
        "rename" => parse_rename(&args)?,
        "move" => match args.as_slice() {
            [from, to] => Command::Move {
                from: from.parse()?,
                to: to.parse()?,
            },
            _ => {
                return Err(ParseError::MissingArgument {
                    command: "move",
                    argument: "<from> <to>",
                })
            }
        },
        "copy" => parse_copy("copy", &args, CopyMode::Append)?,
        "slice" => parse_copy("slice", &args, CopyMode::Overwrite)?,
        "meta" => parse_meta(&args, rest)?,
        "unmeta" => {
            let (position, args) = leading_position(&args);
            match args {
                [] => Command::Unmeta {
                    position,
                    key: None,
                },
                [key] => Command::Unmeta {
                    position,
                    key: Some((*key).to_string()),
                },
                _ => return Err(ParseError::invalid("unmeta", "expected at most one key")),
            }
        }
        "edit" => parse_edit(rest)?,
        "name" => match args.as_slice() {
            [role, name @ ..] if !name.is_empty() => Command::Name {
                role: role_arg("name", role)?,
                name: name.join(" "),
            },
            _ => {
                return Err(ParseError::MissingArgument {
                    command: "name",
                    argument: "<role> <name>",
                })
            }
        },
        "unname" => match args.as_slice() {
            [] => Command::Unname(None),
            [role] => Command::Unname(Some(role_arg("unname", role)?)),
            _ => return Err(ParseError::invalid("unname", "expected at most one role")),
        },
        "image" => match args.as_slice() {
            [source] => Command::Attach {
                kind: AttachKind::Image { detail: None },
                source: (*source).to_string(),
            },
            [source, detail] => Command::Attach {
                kind: AttachKind::Image {
                    detail: Some((*detail).to_string()),
                },
                source: (*source).to_string(),
            },
            _ => {
                return Err(ParseError::MissingArgument {
                    command: "image",
                    argument: "<path|url> [detail]",
                })
            }
        },
        "audio" => match args.as_slice() {
            [source] => Command::Attach {
                kind: AttachKind::Audio,
                source: (*source).to_string(),
            },
            _ => {
                return Err(ParseError::MissingArgument {
                    command: "audio",
                    argument: "<path|url>",
                })
            }
        },
        "read" => match args.as_slice() {
            [path] => Command::Read {
                path: PathBuf::from(path),
                role: Role::User,
            },
            [path, role] => Command::Read {
                path: PathBuf::from(path),
                role: role_arg("read", role)?,
            },
            _ => {
                return Err(ParseError::MissingArgument {
                    command: "read",
                    argument: "<path> [role]",
                })
            }
        },
        "write" => match args.as_slice() {
            [path] => Command::Write {
                path: PathBuf::from(path),
                position: Position::LAST,
            },
            [path, position] => Command::Write {
                path: PathBuf::from(path),
                position: position.parse()?,
            },
            _ => {
                return Err(ParseError::MissingArgument {
                    command: "write",
                    argument: "<path> [pos]",
                })
            }
        },
        "transcribe" => Command::Transcribe(PathBuf::from(required_text(
            "transcribe",
            "<path>",
            rest,
        )?)),
        "thread" => Command::Thread(optional_single("thread", &args)?),
        "threads" => Command::Threads,
        "delete" => match args.as_slice() {
            [] | ["*"] => Command::Delete(DeleteTarget::All),
            [name] => Command::Delete(DeleteTarget::Thread((*name).to_string())),
            _ => return Err(ParseError::invalid("delete", "expected at most one thread name")),
        },
        "save" => Command::Save(optional_single("save", &args)?.map(PathBuf::from)),
        "load" => Command::Load(optional_single("load", &args)?.map(PathBuf::from)),
        "set" => match args.as_slice() {
            [key, value @ ..] if !value.is_empty() => Command::Set {
                key: (*key).to_string(),
                value: json_or_string(&value.join(" ")),
            },
            _ => {
                return Err(ParseError::MissingArgument {
                    command: "set",
                    argument: "<key> <value>",
                })
            }
        },
        "unset" => Command::Unset(optional_single("unset", &args)?),
        "stream" => match args.as_slice() {
            [] => Command::Stream(None),
            ["on"] => Command::Stream(Some(true)),
            ["off"] => Command::Stream(Some(false)),
            _ => return Err(ParseError::invalid("stream", "expected on or off")),
        },
        "model" => Command::Model(optional_single("model", &args)?),
        "account" => Command::Account(optional_single("account", &args)?),
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        unknown => return Err(ParseError::UnknownCommand(unknown.to_string())),
    };

    Ok(Some(command))
}

fn append(role: Role, rest: &str) -> Command {
    Command::Append {
        role,
        content: rest.to_string(),
    }
}

fn required_text(
    command: &'static str,
    argument: &'static str,
    rest: &str,
) -> Result<String, ParseError> {
    if rest.is_empty() {
        return Err(ParseError::MissingArgument { command, argument });
    }
    Ok(rest.to_string())
}

fn optional_single(command: &'static str, args: &[&str]) -> Result<Option<String>, ParseError> {
    match args {
        [] => Ok(None),
        [single] => Ok(Some((*single).to_string())),
        _ => Err(ParseError::invalid(command, "expected at most one argument")),
    }
}

fn range_or(args: &[&str], default: RangeSpec) -> Result<RangeSpec, ParseError> {
    if args.is_empty() {
        return Ok(default);
    }
    Ok(args.join(" ").parse()?)
}

fn position_or_last(args: &[&str]) -> Result<Position, ParseError> {
    match args {
        [] => Ok(Position::LAST),
        [position] => Ok(position.parse()?),
        _ => Err(ParseError::invalid("pop", "expected at most one position")),
    }
}

fn count(command: &'static str, args: &[&str]) -> Result<usize, ParseError> {
    match args {
        [] => Ok(1),
        [k] => match k.parse::<usize>() {
            Ok(k) if k >= 1 => Ok(k),
            _ => Err(ParseError::invalid(command, "count must be a positive integer")),
        },
        _ => Err(ParseError::invalid(command, "expected at most one count")),
    }
}

fn role_arg(command: &'static str, token: &str) -> Result<Role, ParseError> {
    token
        .parse()
        .map_err(|error: threadkeeper::message::ParseRoleError| {
            ParseError::invalid(command, error.to_string())
        })
}

/// A leading token that parses as a position, or the last message.
fn leading_position<'a, 'b>(args: &'a [&'b str]) -> (Position, &'a [&'b str]) {
    match args.split_first() {
        Some((first, rest)) if is_position(first) => match first.parse() {
            Ok(position) => (position, rest),
            Err(_) => (Position::LAST, args),
        },
        _ => (Position::LAST, args),
    }
}

fn is_position(token: &str) -> bool {
    token
        .parse::<i64>()
        .is_ok_and(|value| value != 0)
}

/// Everything after `role` that parses as a range is the range; otherwise
/// the last token is the name.
fn parse_rename(args: &[&str]) -> Result<Command, ParseError> {
    let Some((role, rest)) = args.split_first() else {
        return Err(ParseError::MissingArgument {
            command: "rename",
            argument: "<role>",
        });
    };
    let role = role_arg("rename", role)?;

    if rest.is_empty() {
        return Ok(Command::Rename {
            role,
            spec: RangeSpec::Whole,
            name: None,
        });
    }
    if let Ok(spec) = rest.join(" ").parse() {
        return Ok(Command::Rename {
            role,
            spec,
            name: None,
        });
    }

    let (name, range) = rest
        .split_last()
        .map(|(name, range)| ((*name).to_string(), range))
        .unwrap_or_default();
    Ok(Command::Rename {
        role,
        spec: range_or(range, RangeSpec::Whole)?,
        name: Some(name),
    })
}

fn parse_copy(command: &'static str, args: &[&str], mode: CopyMode) -> Result<Command, ParseError> {
    if args.is_empty() {
        return Err(ParseError::MissingArgument {
            command,
            argument: "<range>",
        });
    }
    if let Ok(spec) = args.join(" ").parse() {
        return Ok(Command::Copy {
            spec,
            dest: None,
            mode,
        });
    }

    match args.split_last() {
        Some((dest, range)) if !range.is_empty() => Ok(Command::Copy {
            spec: range.join(" ").parse()?,
            dest: Some((*dest).to_string()),
            mode,
        }),
        _ => Err(ParseError::MissingArgument {
            command,
            argument: "<range>",
        }),
    }
}

fn parse_meta(args: &[&str], rest: &str) -> Result<Command, ParseError> {
    let (position, remaining) = leading_position(args);
    let Some((key, value)) = remaining.split_first() else {
        return Ok(Command::Meta {
            position,
            key: None,
            value: None,
        });
    };

    let value = if value.is_empty() {
        None
    } else {
        let consumed = args.len() - remaining.len() + 1;
        Some(json_or_string(text_after_tokens(rest, consumed)))
    };
    Ok(Command::Meta {
        position,
        key: Some((*key).to_string()),
        value,
    })
}

fn parse_edit(rest: &str) -> Result<Command, ParseError> {
    let (head, tail) = match rest.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim()),
        None => (rest, ""),
    };

    if is_position(head) && !tail.is_empty() {
        return Ok(Command::Edit {
            position: head.parse()?,
            content: tail.to_string(),
        });
    }
    Ok(Command::Edit {
        position: Position::LAST,
        content: required_text("edit", "text", rest)?,
    })
}

/// The text after the first `count` whitespace-separated tokens, keeping its
/// own spacing.
fn text_after_tokens(text: &str, count: usize) -> &str {
    let mut remaining = text.trim_start();
    for _ in 0..count {
        let end = remaining
            .find(char::is_whitespace)
            .unwrap_or(remaining.len());
        remaining = remaining[end..].trim_start();
    }
    remaining.trim_end()
}

/// JSON when it parses, otherwise the raw text as a string.
fn json_or_string(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
