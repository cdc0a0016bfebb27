//! Provider credential storage and sanity checks

use std::collections::HashMap;

/// Values that are obviously copied from documentation, never real keys
const PLACEHOLDER_VALUES: &[&str] = &[
    "your-api-key",
    "your_api_key",
    "your-api-token",
    "demo",
    "test",
    "placeholder",
    "changeme",
    "xxx",
    "sk-xxx",
];

/// Shortest value accepted as a real credential
pub const MIN_CREDENTIAL_LENGTH: usize = 10;

/// Whether `value` looks like a usable credential.
///
/// `test-`/`test_` prefixed values pass only in test mode.
pub fn is_plausible(value: &str, test_mode: bool) -> bool {
    let value = value.trim();
    if value.len() < MIN_CREDENTIAL_LENGTH {
        return false;
    }

    let lower = value.to_lowercase();
    if PLACEHOLDER_VALUES.contains(&lower.as_str()) {
        return false;
    }

    if (lower.starts_with("test-") || lower.starts_with("test_")) && !test_mode {
        return false;
    }

    true
}

/// Credential values keyed by environment variable name
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    values: HashMap<String, String>,
    test_mode: bool,
}

impl Credentials {
    /// Read the given keys from the process environment
    pub fn from_env(keys: &[&str], test_mode: bool) -> Self {
        let values = keys
            .iter()
            .filter_map(|key| {
                std::env::var(key)
                    .ok()
                    .map(|value| (key.to_string(), value.trim().to_string()))
            })
            .collect();
        Self { values, test_mode }
    }

    /// Build credentials from explicit pairs
    pub fn from_pairs<I, K, V>(pairs: I, test_mode: bool) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into().trim().to_string()))
            .collect();
        Self { values, test_mode }
    }

    /// The value for `key` if present and plausible
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|value| is_plausible(value, self.test_mode))
    }

    pub fn is_valid(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}
