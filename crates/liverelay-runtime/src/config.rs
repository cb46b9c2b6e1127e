//! Configuration loading: TOML file, then environment and flags on top.
//!
//! Validation happens once, before any listener binds. A failure here is
//! the only fatal startup error.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use liverelay_core::Tenant;
use liverelay_daemon::RelayConfig;
use liverelay_upstream::proxy::proxy_authority;

use crate::cli::SettingsArgs;

pub const DEFAULT_WS_ADDR: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
    10000,
);
pub const DEFAULT_ADMIN_ADDR: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
    10001,
);
pub const DEFAULT_UPSTREAM_URL: &str = "ws://127.0.0.1:8081/live/{source}";
pub const MIN_SECRET_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid tenants JSON: {0}")]
    TenantsJson(#[from] serde_json::Error),

    #[error("ws secret is required (--ws-secret or LIVERELAY_WS_SECRET)")]
    MissingSecret,

    #[error("ws secret must be at least {MIN_SECRET_LEN} characters")]
    WeakSecret,

    #[error("tenant #{0} has an empty token")]
    EmptyToken(usize),

    #[error("tenant {0} has an empty source id")]
    EmptySource(String),

    #[error("duplicate tenant token: {0}")]
    DuplicateToken(String),

    #[error("upstream url must be a ws:// template containing {{source}}: {0}")]
    UpstreamUrl(String),

    #[error("invalid proxy url {url}: {reason}")]
    ProxyUrl { url: String, reason: String },
}

// ---------------------------------------------------------------------------
// File layer
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub ws_addr: Option<SocketAddr>,
    pub admin_addr: Option<SocketAddr>,
    pub ws_secret: Option<String>,
    pub admin_secret: Option<String>,
    pub proxy_url: Option<String>,
    pub upstream_url: Option<String>,
    pub tenants: Vec<Tenant>,
    pub relay: RelayConfig,
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }
}

// ---------------------------------------------------------------------------
// Resolved settings
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Settings {
    pub ws_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub ws_secret: String,
    pub admin_secret: Option<String>,
    pub proxy_url: Option<String>,
    pub upstream_url: String,
    pub tenants: Vec<Tenant>,
    pub relay: RelayConfig,
}

impl Settings {
    pub fn load(args: &SettingsArgs) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => FileConfig::read(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(args, file)
    }

    /// Merge flags/env over the file layer, apply defaults, validate.
    pub fn resolve(args: &SettingsArgs, file: FileConfig) -> Result<Self, ConfigError> {
        let tenants = match &args.tenants_json {
            Some(json) => serde_json::from_str(json)?,
            None => file.tenants,
        };
        let settings = Self {
            ws_addr: args.ws_addr.or(file.ws_addr).unwrap_or(DEFAULT_WS_ADDR),
            admin_addr: args.admin_addr.or(file.admin_addr).unwrap_or(DEFAULT_ADMIN_ADDR),
            ws_secret: non_empty(args.ws_secret.clone().or(file.ws_secret))
                .ok_or(ConfigError::MissingSecret)?,
            admin_secret: non_empty(args.admin_secret.clone().or(file.admin_secret)),
            proxy_url: non_empty(args.proxy_url.clone().or(file.proxy_url)),
            upstream_url: non_empty(args.upstream_url.clone().or(file.upstream_url))
                .unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string()),
            tenants,
            relay: file.relay,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ws_secret.chars().count() < MIN_SECRET_LEN {
            return Err(ConfigError::WeakSecret);
        }
        if !self.upstream_url.starts_with("ws://") || !self.upstream_url.contains("{source}") {
            return Err(ConfigError::UpstreamUrl(self.upstream_url.clone()));
        }
        if let Some(url) = &self.proxy_url {
            proxy_authority(url).map_err(|e| ConfigError::ProxyUrl {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        }
        let mut seen = HashSet::new();
        for (index, tenant) in self.tenants.iter().enumerate() {
            if tenant.token.trim().is_empty() {
                return Err(ConfigError::EmptyToken(index));
            }
            if tenant.source_id.trim().is_empty() {
                return Err(ConfigError::EmptySource(tenant.token.clone()));
            }
            if !seen.insert(tenant.token.as_str()) {
                return Err(ConfigError::DuplicateToken(tenant.token.clone()));
            }
        }
        Ok(())
    }

    pub fn active_tenants(&self) -> usize {
        self.tenants.iter().filter(|t| t.active).count()
    }
}

// Secrets stay out of logs and panic messages.
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("ws_addr", &self.ws_addr)
            .field("admin_addr", &self.admin_addr)
            .field("ws_secret", &"<redacted>")
            .field("admin_secret", &self.admin_secret.as_ref().map(|_| "<redacted>"))
            .field("proxy_url", &self.proxy_url)
            .field("upstream_url", &self.upstream_url)
            .field("tenants", &self.tenants)
            .field("relay", &self.relay)
            .finish()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
