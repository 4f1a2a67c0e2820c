//! Access credential for the destination search engine.

use std::fmt;

use anyhow::{Context, Result};
use dialoguer::Password;
use secrecy::{ExposeSecret, SecretBox};

pub const API_KEY_ENV: &str = "TATOEBA_INDEXER_API_KEY";

/// An API key that is redacted from `Debug` and `Display` output.
pub struct ApiKey(SecretBox<str>);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretBox::new(Box::from(value.into().as_str())))
    }

    /// Only call this when building the request that carries the key.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Clone for ApiKey {
    fn clone(&self) -> Self {
        Self::new(self.expose())
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Takes the key from the environment when set, otherwise prompts for it if asked to.
pub fn resolve_api_key(prompt: bool) -> Result<Option<ApiKey>> {
    let from_env = std::env::var(API_KEY_ENV).ok();
    resolve_with(from_env, prompt, || {
        Password::new()
            .with_prompt("Please enter the API key")
            .allow_empty_password(true)
            .interact()
            .context("failed to read the API key from the terminal")
    })
}

fn resolve_with<F>(from_env: Option<String>, prompt: bool, ask: F) -> Result<Option<ApiKey>>
where
    F: FnOnce() -> Result<String>,
{
    let value = match from_env {
        Some(value) => Some(value),
        None if prompt => Some(ask()?),
        None => None,
    };

    Ok(value
        .filter(|value| !value.trim().is_empty())
        .map(|value| ApiKey::new(value.trim())))
}
