//! Configuration: TOML file loading, CLI overrides, and defaults.
//!
//! Resolution order (first found wins, values merge/override):
//! 1. CLI flags (`--base-url`, `--sort`, etc.)
//! 2. `--config` file
//! 3. `$FMW_CONFIG` environment variable (path to config file)
//! 4. Project-local `.fmw.toml` in the current working directory
//! 5. Global `~/.config/fmw/config.toml`
//! 6. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::app::WorkspaceSettings;
use crate::workspace::projection::{SortDir, SortKey, ViewOptions};

// ── Section configs ──────────────────────────────────────────────────────────

/// Directory service connection.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the directory service API.
    pub base_url: Option<String>,
    /// Bearer token. Prefer `token_env` over writing tokens to disk.
    pub token: Option<String>,
    /// Environment variable holding the bearer token.
    pub token_env: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
}

/// Listing presentation.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ViewConfig {
    /// Sort key: "updated", "name", "size", "type".
    pub sort_by: Option<String>,
    /// Sort direction: "asc" or "desc".
    pub sort_dir: Option<String>,
    /// Only list starred entries.
    pub star_only: Option<bool>,
}

/// Transient access URL lifetimes.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct UrlConfig {
    /// Validity of URLs used for previews and exports.
    pub signed_ttl_secs: Option<u64>,
    /// Validity of thumbnail URLs.
    pub thumbnail_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory archives are written to.
    pub output_dir: Option<String>,
}

// ── Top-level config ─────────────────────────────────────────────────────────

/// Top-level configuration.
///
/// All fields are optional so that partial configs from different sources
/// can be merged together (CLI overrides file, file overrides defaults).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub view: ViewConfig,
    pub urls: UrlConfig,
    pub export: ExportConfig,
}

// ── Default constants ────────────────────────────────────────────────────────

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Default validity of preview and export URLs.
pub const DEFAULT_SIGNED_TTL_SECS: u64 = 600;
/// Default validity of thumbnail URLs.
pub const DEFAULT_THUMBNAIL_TTL_SECS: u64 = 300;
/// Environment variable read for the token when none is configured.
pub const DEFAULT_TOKEN_ENV: &str = "FMW_TOKEN";

// ── Config file locator ──────────────────────────────────────────────────────

/// Return the list of candidate config file paths in priority order.
///
/// Does NOT include the CLI `--config` path; that is handled separately.
fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(env_path) = std::env::var("FMW_CONFIG") {
        paths.push(PathBuf::from(env_path));
    }

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(".fmw.toml"));
    }

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("fmw").join("config.toml"));
    }

    paths
}

/// Try to read and parse a TOML config file. Returns `None` if the file
/// doesn't exist or can't be parsed.
fn load_file(path: &Path) -> Option<AppConfig> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<AppConfig>(&content) {
        Ok(cfg) => {
            debug!(path = %path.display(), "loaded config file");
            Some(cfg)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse config file");
            None
        }
    }
}

// ── Merge logic ──────────────────────────────────────────────────────────────

impl AppConfig {
    /// Merge `other` on top of `self`; `other`'s `Some` values win.
    pub fn merge(self, other: &AppConfig) -> AppConfig {
        AppConfig {
            service: ServiceConfig {
                base_url: other.service.base_url.clone().or(self.service.base_url),
                token: other.service.token.clone().or(self.service.token),
                token_env: other.service.token_env.clone().or(self.service.token_env),
                timeout_secs: other.service.timeout_secs.or(self.service.timeout_secs),
            },
            view: ViewConfig {
                sort_by: other.view.sort_by.clone().or(self.view.sort_by),
                sort_dir: other.view.sort_dir.clone().or(self.view.sort_dir),
                star_only: other.view.star_only.or(self.view.star_only),
            },
            urls: UrlConfig {
                signed_ttl_secs: other.urls.signed_ttl_secs.or(self.urls.signed_ttl_secs),
                thumbnail_ttl_secs: other
                    .urls
                    .thumbnail_ttl_secs
                    .or(self.urls.thumbnail_ttl_secs),
            },
            export: ExportConfig {
                output_dir: other.export.output_dir.clone().or(self.export.output_dir),
            },
        }
    }

    /// Load the final merged configuration.
    ///
    /// `cli_config_path` is an explicit config file path from `--config`.
    /// `cli_overrides` are partial overrides derived from CLI flags.
    pub fn load(cli_config_path: Option<&Path>, cli_overrides: Option<&AppConfig>) -> AppConfig {
        let mut config = AppConfig::default();

        // Walk in reverse so that highest-priority (env var) overwrites lower.
        for path in candidate_paths().iter().rev() {
            if let Some(file_cfg) = load_file(path) {
                config = config.merge(&file_cfg);
            }
        }

        if let Some(cli_path) = cli_config_path {
            match load_file(cli_path) {
                Some(file_cfg) => config = config.merge(&file_cfg),
                None => warn!(path = %cli_path.display(), "config file not loaded"),
            }
        }

        if let Some(overrides) = cli_overrides {
            config = config.merge(overrides);
        }

        config
    }

    // ── Convenience getters with built-in defaults ──────────────────────────

    pub fn base_url(&self) -> Option<&str> {
        self.service.base_url.as_deref()
    }

    /// Name of the environment variable holding the token.
    pub fn token_env(&self) -> &str {
        self.service.token_env.as_deref().unwrap_or(DEFAULT_TOKEN_ENV)
    }

    /// Bearer token: the configured value, else the token environment variable.
    pub fn token(&self) -> Option<String> {
        self.service
            .token
            .clone()
            .or_else(|| std::env::var(self.token_env()).ok())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.service.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    pub fn sort_key(&self) -> SortKey {
        SortKey::parse(self.view.sort_by.as_deref().unwrap_or("updated"))
    }

    pub fn sort_dir(&self) -> SortDir {
        SortDir::parse(self.view.sort_dir.as_deref().unwrap_or("desc"))
    }

    pub fn star_only(&self) -> bool {
        self.view.star_only.unwrap_or(false)
    }

    pub fn signed_ttl(&self) -> Duration {
        Duration::from_secs(self.urls.signed_ttl_secs.unwrap_or(DEFAULT_SIGNED_TTL_SECS))
    }

    pub fn thumbnail_ttl(&self) -> Duration {
        Duration::from_secs(
            self.urls
                .thumbnail_ttl_secs
                .unwrap_or(DEFAULT_THUMBNAIL_TTL_SECS),
        )
    }

    /// Directory export archives are saved to.
    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(self.export.output_dir.as_deref().unwrap_or("."))
    }

    /// Settings a workspace is built with.
    pub fn workspace_settings(&self) -> WorkspaceSettings {
        WorkspaceSettings {
            view: ViewOptions {
                star_only: self.star_only(),
                search_text: String::new(),
                sort_key: self.sort_key(),
                sort_dir: self.sort_dir(),
            },
            signed_url_ttl: self.signed_ttl(),
            thumbnail_ttl: self.thumbnail_ttl(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
