use std::sync::Arc;

use chat_provider::ChatProvider;
use chat_provider_mock::{MockProvider, MOCK_PROVIDER_ID};

pub const DEFAULT_PROVIDER_ID: &str = MOCK_PROVIDER_ID;
pub const PROVIDER_ENV_VAR: &str = "THREADKEEPER_PROVIDER";

/// Provider id named by `THREADKEEPER_PROVIDER`, if set and non-blank.
pub fn provider_id_from_env() -> Option<String> {
    std::env::var(PROVIDER_ENV_VAR)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn provider_for_id(provider_id: &str) -> Result<Arc<dyn ChatProvider>, String> {
    match provider_id {
        DEFAULT_PROVIDER_ID => Ok(Arc::new(MockProvider::default())),
        unknown => Err(format!(
            "Unsupported provider '{unknown}'. Available providers: {DEFAULT_PROVIDER_ID}"
        )),
    }
}
