//! Server configuration
//!
//! Backend language servers are configured per fragment language tag. Sources
//! are merged in order, later ones winning:
//!
//! 1. the `FRAGMENTS_BACKENDS` environment variable (`sql=sqls;python=pylsp --check`)
//! 2. `--backend <tag>=<command>` command line flags
//! 3. `initializationOptions.backends` sent by the client
//!
//! Malformed entries are skipped with a warning; they never stop the server.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::language_regions::{is_valid_language_tag, language_id_for_tag};

/// Environment variable holding `;`-separated `tag=command` entries
pub const BACKENDS_ENV: &str = "FRAGMENTS_BACKENDS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("backend entry '{0}' is not of the form <tag>=<command>")]
    MissingSeparator(String),
    #[error("'{0}' is not a usable language tag")]
    InvalidLanguageTag(String),
    #[error("backend for '{0}' has an empty command")]
    EmptyCommand(String),
    #[error("invalid initialization options: {0}")]
    InvalidOptions(#[from] serde_json::Error),
}

/// How to start the language server handling one fragment language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl BackendCommand {
    /// Splits a command line on whitespace; the first word is the program
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut words = command_line.split_whitespace().map(str::to_string);
        let command = words.next()?;
        Some(BackendCommand {
            command,
            args: words.collect(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Backend commands keyed by fragment language tag
    #[serde(default)]
    pub backends: HashMap<String, BackendCommand>,
}

impl ServerConfig {
    /// Builds the startup configuration from the environment and CLI entries
    pub fn from_env_and_args(cli_entries: &[String]) -> Self {
        let mut config = ServerConfig::default();
        if let Ok(value) = std::env::var(BACKENDS_ENV) {
            debug!("Reading backends from {}", BACKENDS_ENV);
            config.merge_entries(split_env_value(&value));
        }
        config.merge_entries(cli_entries.iter().map(String::as_str));
        config
    }

    /// Parses one `<tag>=<command>` entry
    pub fn parse_entry(entry: &str) -> Result<(String, BackendCommand), ConfigError> {
        let (tag, command_line) = entry
            .split_once('=')
            .ok_or_else(|| ConfigError::MissingSeparator(entry.to_string()))?;
        let tag = tag.trim();
        if !is_valid_language_tag(tag) {
            return Err(ConfigError::InvalidLanguageTag(tag.to_string()));
        }
        let command = BackendCommand::parse(command_line).ok_or_else(|| ConfigError::EmptyCommand(tag.to_string()))?;
        Ok((tag.to_string(), command))
    }

    pub fn merge_entries<'a>(&mut self, entries: impl IntoIterator<Item = &'a str>) {
        for entry in entries {
            match Self::parse_entry(entry) {
                Ok((tag, command)) => {
                    self.backends.insert(tag, command);
                }
                Err(e) => warn!("Skipping backend entry: {}", e),
            }
        }
    }

    /// Merges `initializationOptions.backends`, e.g.
    /// `{"backends": {"sql": {"command": "sqls", "args": []}}}`
    pub fn merge_initialization_options(&mut self, options: Option<&Value>) -> Result<(), ConfigError> {
        let Some(backends) = options.and_then(|options| options.get("backends")) else {
            return Ok(());
        };
        let backends: HashMap<String, BackendCommand> = serde_json::from_value(backends.clone())?;
        for (tag, command) in backends {
            if !is_valid_language_tag(&tag) {
                warn!("Skipping backend: {}", ConfigError::InvalidLanguageTag(tag));
                continue;
            }
            if command.command.trim().is_empty() {
                warn!("Skipping backend: {}", ConfigError::EmptyCommand(tag));
                continue;
            }
            self.backends.insert(tag, command);
        }
        Ok(())
    }

    /// Backend for a fragment tag, falling back to the tag's language id
    /// (`py` finds a backend configured for `python`)
    pub fn backend(&self, language_tag: &str) -> Option<&BackendCommand> {
        self.backends
            .get(language_tag)
            .or_else(|| self.backends.get(language_id_for_tag(language_tag)))
    }
}

fn split_env_value(value: &str) -> impl Iterator<Item = &str> {
    value.split(';').map(str::trim).filter(|entry| !entry.is_empty())
}
