//! Shell settings: environment, then an optional JSON file, then CLI flags.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use threadkeeper::{EngineConfig, Policy};

use crate::commands::is_command;
use crate::providers::{provider_id_from_env, DEFAULT_PROVIDER_ID};

pub const CONFIG_ENV_VAR: &str = "THREADKEEPER_CONFIG";
pub const DEFAULT_PROMPT: &str = "{thread}> ";
/// Account used when none is chosen, and the name of the implicit account
/// when the config file defines none.
pub const DEFAULT_ACCOUNT: &str = "default";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("account {0:?} is not configured")]
    UnknownAccount(String),

    #[error("macro name {0:?} is a built-in command")]
    MacroName(String),
}

/// A named provider and model pairing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountConfig {
    pub provider: String,
    pub model: Option<String>,
}

/// The JSON config file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShellConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Prompt template; `{thread}`, `{model}`, `{provider}` and `{account}`
    /// are substituted.
    pub prompt: Option<String>,
    pub fork_on_retry: Option<Policy>,
    pub allow_empty_messages: Option<Policy>,
    pub show_cost: Option<bool>,
    pub show_token_usage: Option<bool>,
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountConfig>,
    /// Macro name to body, one command per line.
    #[serde(default)]
    pub macros: BTreeMap<String, String>,
}

impl ShellConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads `path`, or the file named by `THREADKEEPER_CONFIG`, or nothing.
    pub fn discover(path: Option<&Path>) -> Result<Option<Self>, ConfigError> {
        let path = path.map(Path::to_path_buf).or_else(|| {
            std::env::var_os(CONFIG_ENV_VAR)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        });
        path.map(|path| Self::load(&path)).transpose()
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub account: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub fork_on_retry: Option<Policy>,
    pub allow_empty_messages: Option<Policy>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellSettings {
    /// Account active at startup.
    pub account: String,
    /// Every account that `account` can switch to, including the active one.
    pub accounts: BTreeMap<String, AccountConfig>,
    pub provider_id: String,
    pub model: Option<String>,
    pub prompt: String,
    pub engine: EngineConfig,
    pub show_cost: bool,
    pub show_token_usage: bool,
    pub macros: BTreeMap<String, String>,
}

impl Default for ShellSettings {
    fn default() -> Self {
        let provider_id = DEFAULT_PROVIDER_ID.to_string();
        Self {
            account: DEFAULT_ACCOUNT.to_string(),
            accounts: BTreeMap::from([(
                DEFAULT_ACCOUNT.to_string(),
                AccountConfig {
                    provider: provider_id.clone(),
                    model: None,
                },
            )]),
            provider_id,
            model: None,
            prompt: DEFAULT_PROMPT.to_string(),
            engine: EngineConfig::default(),
            show_cost: false,
            show_token_usage: false,
            macros: BTreeMap::new(),
        }
    }
}

impl ShellSettings {
    /// Layers the environment, `file` and `overrides`, later ones winning.
    ///
    /// With no accounts in the file, the top-level provider and model form
    /// an implicit `default` account. Otherwise the chosen account (the
    /// override, then `default`, then the first by name) supplies them, and
    /// the command-line provider and model still win over it.
    pub fn resolve(file: Option<ShellConfig>, overrides: Overrides) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let file = file.unwrap_or_default();
        let engine = EngineConfig::from_env();

        if let Some(name) = file.macros.keys().find(|name| is_command(name)) {
            return Err(ConfigError::MacroName(name.clone()));
        }

        let (account, accounts, provider_id, model) = if file.accounts.is_empty() {
            let account = overrides
                .account
                .unwrap_or_else(|| DEFAULT_ACCOUNT.to_string());
            if account != DEFAULT_ACCOUNT {
                return Err(ConfigError::UnknownAccount(account));
            }
            let provider_id = overrides
                .provider
                .or(file.provider)
                .or_else(provider_id_from_env)
                .unwrap_or(defaults.provider_id);
            let model = overrides.model.or(file.model);
            let implicit = AccountConfig {
                provider: provider_id.clone(),
                model: model.clone(),
            };
            let accounts = BTreeMap::from([(account.clone(), implicit)]);
            (account, accounts, provider_id, model)
        } else {
            let account = match overrides.account {
                Some(account) => account,
                None if file.accounts.contains_key(DEFAULT_ACCOUNT) => DEFAULT_ACCOUNT.to_string(),
                None => file
                    .accounts
                    .keys()
                    .next()
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_ACCOUNT.to_string()),
            };
            let chosen = file
                .accounts
                .get(&account)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownAccount(account.clone()))?;
            let provider_id = overrides.provider.unwrap_or(chosen.provider);
            let model = overrides.model.or(chosen.model);
            (account, file.accounts, provider_id, model)
        };

        Ok(Self {
            account,
            accounts,
            provider_id,
            model,
            prompt: file.prompt.unwrap_or(defaults.prompt),
            engine: EngineConfig {
                fork_on_retry: overrides
                    .fork_on_retry
                    .or(file.fork_on_retry)
                    .unwrap_or(engine.fork_on_retry),
                allow_empty_messages: overrides
                    .allow_empty_messages
                    .or(file.allow_empty_messages)
                    .unwrap_or(engine.allow_empty_messages),
            },
            show_cost: file.show_cost.unwrap_or(defaults.show_cost),
            show_token_usage: file.show_token_usage.unwrap_or(defaults.show_token_usage),
            macros: file.macros,
        })
    }
}

/// Values a prompt template can show.
#[derive(Debug, Clone, Copy)]
pub struct PromptFields<'a> {
    pub thread: &'a str,
    pub model: &'a str,
    pub provider: &'a str,
    pub account: &'a str,
}

/// Fills a prompt template.
#[must_use]
pub fn render_prompt(template: &str, fields: PromptFields<'_>) -> String {
    template
        .replace("{thread}", fields.thread)
        .replace("{model}", fields.model)
        .replace("{provider}", fields.provider)
        .replace("{account}", fields.account)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::{Mutex, OnceLock};

    use threadkeeper::config::{ALLOW_EMPTY_MESSAGES_ENV, FORK_ON_RETRY_ENV};

    use super::*;
    use crate::providers::PROVIDER_ENV_VAR;

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    struct EnvGuard {
        saved: Vec<(&'static str, Option<std::ffi::OsString>)>,
    }

    impl EnvGuard {
        fn set(vars: &[(&'static str, Option<&str>)]) -> Self {
            let saved = vars
                .iter()
                .map(|(key, _)| (*key, std::env::var_os(key)))
                .collect();
            for (key, value) in vars {
                match value {
                    Some(value) => std::env::set_var(key, value),
                    None => std::env::remove_var(key),
                }
            }
            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in &self.saved {
                match value {
                    Some(value) => std::env::set_var(key, value),
                    None => std::env::remove_var(key),
                }
            }
        }
    }

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp config should be created");
        file.write_all(text.as_bytes())
            .expect("temp config should be written");
        file
    }

    #[test]
    fn config_file_parses_known_fields() {
        let file = write_config(
            r#"{"provider": "mock", "prompt": "[{thread}] ", "fork_on_retry": "ask", "show_cost": true}"#,
        );
        let config = ShellConfig::load(file.path()).expect("config should load");

        assert_eq!(config.provider.as_deref(), Some("mock"));
        assert_eq!(config.fork_on_retry, Some(Policy::Ask));
        assert_eq!(config.show_cost, Some(true));
        assert_eq!(config.model, None);
    }

    #[test]
    fn config_file_rejects_unknown_fields() {
        let file = write_config(r#"{"provider": "mock", "colour": "blue"}"#);
        let error = ShellConfig::load(file.path()).expect_err("unknown field must fail");
        assert!(matches!(error, ConfigError::Parse { .. }));
        assert!(error.to_string().contains("colour"));
    }

    #[test]
    fn missing_config_file_is_io_error() {
        let error = ShellConfig::load(Path::new("/nonexistent/threadkeeper.json"))
            .expect_err("missing file must fail");
        assert!(matches!(error, ConfigError::Io { .. }));
    }

    #[test]
    fn cli_beats_file_beats_environment() {
        let _lock = env_lock().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let _env = EnvGuard::set(&[
            (PROVIDER_ENV_VAR, Some("env-provider")),
            (FORK_ON_RETRY_ENV, Some("never")),
            (ALLOW_EMPTY_MESSAGES_ENV, None),
        ]);

        let from_env =
            ShellSettings::resolve(None, Overrides::default()).expect("settings should resolve");
        assert_eq!(from_env.provider_id, "env-provider");
        assert_eq!(from_env.engine.fork_on_retry, Policy::Never);

        let file = ShellConfig {
            provider: Some("file-provider".to_string()),
            fork_on_retry: Some(Policy::Ask),
            ..ShellConfig::default()
        };
        let from_file = ShellSettings::resolve(Some(file.clone()), Overrides::default())
            .expect("settings should resolve");
        assert_eq!(from_file.provider_id, "file-provider");
        assert_eq!(from_file.engine.fork_on_retry, Policy::Ask);

        let from_cli = ShellSettings::resolve(
            Some(file),
            Overrides {
                provider: Some("mock".to_string()),
                fork_on_retry: Some(Policy::Always),
                ..Overrides::default()
            },
        )
        .expect("settings should resolve");
        assert_eq!(from_cli.provider_id, "mock");
        assert_eq!(from_cli.engine.fork_on_retry, Policy::Always);
    }

    #[test]
    fn defaults_apply_without_any_source() {
        let _lock = env_lock().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let _env = EnvGuard::set(&[
            (PROVIDER_ENV_VAR, None),
            (FORK_ON_RETRY_ENV, None),
            (ALLOW_EMPTY_MESSAGES_ENV, None),
        ]);

        assert_eq!(
            ShellSettings::resolve(None, Overrides::default()).expect("settings should resolve"),
            ShellSettings::default()
        );
    }

    #[test]
    fn accounts_choose_provider_and_model() {
        let _lock = env_lock().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let _env = EnvGuard::set(&[(PROVIDER_ENV_VAR, Some("env-provider"))]);

        let file = write_config(
            r#"{"accounts": {
                "work": {"provider": "mock", "model": "mock-large"},
                "home": {"provider": "mock"}
            }}"#,
        );
        let config = ShellConfig::load(file.path()).expect("config should load");

        let first = ShellSettings::resolve(Some(config.clone()), Overrides::default())
            .expect("settings should resolve");
        assert_eq!(first.account, "home");
        assert_eq!(first.provider_id, "mock");
        assert_eq!(first.model, None);
        assert_eq!(first.accounts.len(), 2);

        let chosen = ShellSettings::resolve(
            Some(config.clone()),
            Overrides {
                account: Some("work".to_string()),
                ..Overrides::default()
            },
        )
        .expect("settings should resolve");
        assert_eq!(chosen.model.as_deref(), Some("mock-large"));

        let error = ShellSettings::resolve(
            Some(config),
            Overrides {
                account: Some("play".to_string()),
                ..Overrides::default()
            },
        )
        .expect_err("unknown account must fail");
        assert!(matches!(error, ConfigError::UnknownAccount(name) if name == "play"));
    }

    #[test]
    fn implicit_account_is_named_default() {
        let _lock = env_lock().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let _env = EnvGuard::set(&[(PROVIDER_ENV_VAR, None)]);

        let settings = ShellSettings::resolve(
            Some(ShellConfig {
                model: Some("mock-large".to_string()),
                ..ShellConfig::default()
            }),
            Overrides::default(),
        )
        .expect("settings should resolve");
        assert_eq!(settings.account, DEFAULT_ACCOUNT);
        assert_eq!(
            settings.accounts.get(DEFAULT_ACCOUNT),
            Some(&AccountConfig {
                provider: "mock".to_string(),
                model: Some("mock-large".to_string()),
            })
        );

        let error = ShellSettings::resolve(
            None,
            Overrides {
                account: Some("work".to_string()),
                ..Overrides::default()
            },
        )
        .expect_err("only the implicit account exists");
        assert!(matches!(error, ConfigError::UnknownAccount(_)));
    }

    #[test]
    fn macros_may_not_shadow_commands() {
        let _lock = env_lock().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let config = ShellConfig {
            macros: BTreeMap::from([("send".to_string(), "say hi".to_string())]),
            ..ShellConfig::default()
        };
        let error = ShellSettings::resolve(Some(config), Overrides::default())
            .expect_err("built-in names are reserved");
        assert!(matches!(error, ConfigError::MacroName(name) if name == "send"));
    }

    #[test]
    fn prompt_template_substitutes_placeholders() {
        assert_eq!(
            render_prompt(
                "{account}:{provider}/{model} {thread}> ",
                PromptFields {
                    thread: "work",
                    model: "mock-large",
                    provider: "mock",
                    account: "default",
                }
            ),
            "default:mock/mock-large work> "
        );
    }
}
