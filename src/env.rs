//! Environment variable expansion for configuration files
//!
//! Credentials usually live in the environment rather than on disk, so the
//! configuration text may reference variables as `${NAME}` or, with a
//! fallback, `${NAME:-default}`. Expansion runs on the raw YAML before it is
//! parsed.

use std::env;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::config::ConfigError;

/// Matches `${NAME}` and `${NAME:-fallback}`
static ENV_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid regex")
});

/// Expand every environment reference in `input`.
///
/// A reference without a fallback whose variable is unset is an error; all
/// such variables are reported together.
pub fn expand_env_refs(input: &str) -> Result<String, ConfigError> {
    let mut missing: Vec<String> = Vec::new();

    let expanded = ENV_REFERENCE.replace_all(input, |caps: &Captures| {
        let name = &caps[1];
        match (env::var(name), caps.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(fallback)) => fallback.as_str().to_string(),
            (Err(_), None) => {
                if !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "Missing environment variables: {}",
            missing.join(", ")
        )));
    }

    Ok(expanded.into_owned())
}
