//! Credential lookup for model APIs
//!
//! The key is read from an environment variable named in the config
//! (`GOOGLE_API_KEY` by default).

use calcpilot_core::{CalcError, Result};
use std::env;

/// Read the API key from `env_name`
pub fn resolve_api_key(env_name: &str) -> Result<String> {
    match env::var(env_name) {
        Ok(key) if !key.trim().is_empty() => {
            tracing::debug!("Using API key from {}", env_name);
            Ok(key.trim().to_string())
        }
        Ok(_) => Err(CalcError::Auth(format!("{} is set but empty", env_name))),
        Err(_) => Err(CalcError::Auth(format!(
            "No API key found. Set {}=... before running calcpilot",
            env_name
        ))),
    }
}
