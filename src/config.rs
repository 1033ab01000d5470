// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Configuration: layered defaults, a user config file, an explicit
//! config file, and `CLAUDE_LSP_`-prefixed environment variables, in
//! that order of increasing precedence.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

fn default_rate_limit_per_minute() -> u32 {
    100
}

fn default_idle_timeout() -> u64 {
    300
}

/// Top-level configuration, loaded once per supervisor process.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Seconds of inactivity after which an LSP session is shut down.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// Requests per minute allowed per client on the supervisor's HTTP
    /// surface before a `429` is returned.
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,

    /// Per-language LSP server overrides, keyed by language name.
    #[serde(default)]
    pub server: HashMap<String, ServerConfig>,

    /// Direct-invocation back end configuration.
    #[serde(default)]
    pub direct: DirectConfig,
}

/// Override for one language's LSP server.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServerConfig {
    /// Command to execute in place of the registry default, if set.
    #[serde(default)]
    pub command: Option<String>,

    /// Extra arguments appended to the server's launch command.
    #[serde(default)]
    pub args: Vec<String>,

    /// `initializationOptions` sent in the LSP `initialize` request.
    #[serde(default)]
    pub initialization_options: Option<serde_json::Value>,

    /// When true, this language always uses the direct-invocation back
    /// end instead of spawning a language server.
    #[serde(default)]
    pub prefer_direct: bool,
}

/// Direct-invocation back end configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DirectConfig {
    /// Disables direct-invocation checks for every language.
    #[serde(default)]
    pub disable: bool,

    /// Per-language direct-invocation overrides, keyed by language name.
    #[serde(default)]
    pub languages: HashMap<String, LanguageDirectConfig>,
}

/// Per-language direct-invocation override.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LanguageDirectConfig {
    /// Disables the direct-invocation check for this language.
    #[serde(default)]
    pub disable: bool,

    /// Extra arguments appended to the checker's command line.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Config {
    /// Loads configuration from defaults, `~/.config/claude-lsp/config.toml`,
    /// an optional explicit file, then `CLAUDE_LSP_`-prefixed environment
    /// variables, each layer overriding the last.
    ///
    /// # Errors
    ///
    /// Returns an error if any configured source fails to parse, or if
    /// the merged result does not deserialize into [`Config`].
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("idle_timeout", 300)?
            .set_default("rate_limit_per_minute", 100)?;

        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("claude-lsp").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CLAUDE_LSP")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("failed to build configuration")?;
        config.try_deserialize().context("failed to deserialize configuration")
    }

    /// Returns true if `language` should skip the LSP multiplexer and use
    /// the direct-invocation back end instead.
    #[must_use]
    pub fn is_direct_invocation_preferred(&self, language: &str) -> bool {
        self.server.get(language).is_some_and(|s| s.prefer_direct)
    }

    /// Returns the configured command override for `language`'s LSP
    /// server, if any.
    #[must_use]
    pub fn lsp_command_for(&self, language: &str) -> Option<&str> {
        self.server.get(language)?.command.as_deref()
    }

    /// Returns extra arguments configured for `language`'s LSP server.
    #[must_use]
    pub fn lsp_args_for(&self, language: &str) -> &[String] {
        self.server.get(language).map_or(&[], |s| s.args.as_slice())
    }

    /// Returns the `initializationOptions` configured for `language`.
    #[must_use]
    pub fn initialization_options_for(&self, language: &str) -> Option<&serde_json::Value> {
        self.server.get(language)?.initialization_options.as_ref()
    }

    /// Returns true if direct-invocation checking is disabled for
    /// `language`, either globally or per-language.
    #[must_use]
    pub fn direct_check_disabled(&self, language: &str) -> bool {
        self.direct.disable
            || self
                .direct
                .languages
                .get(language)
                .is_some_and(|l| l.disable)
    }

    /// Returns extra arguments configured for `language`'s direct
    /// invocation checker.
    #[must_use]
    pub fn direct_args_for(&self, language: &str) -> &[String] {
        self.direct
            .languages
            .get(language)
            .map_or(&[], |l| l.args.as_slice())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_with_no_sources() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.idle_timeout, 300);
        assert_eq!(config.rate_limit_per_minute, 100);
        assert!(config.server.is_empty());
    }

    #[test]
    fn explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            idle_timeout = 60

            [server.rust]
            command = "custom-rust-analyzer"
            prefer_direct = true

            [direct.languages.python]
            disable = true
            "#,
        )
        .unwrap();

        let config = Config::load(Some(path)).unwrap();
        assert_eq!(config.idle_timeout, 60);
        assert_eq!(config.lsp_command_for("rust"), Some("custom-rust-analyzer"));
        assert!(config.is_direct_invocation_preferred("rust"));
        assert!(config.direct_check_disabled("python"));
        assert!(!config.direct_check_disabled("go"));
    }
}
