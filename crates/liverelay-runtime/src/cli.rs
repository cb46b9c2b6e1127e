//! CLI definition using clap derive.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "liverelay", about = "Multi-tenant live event relay", version)]
pub struct Cli {
    #[command(flatten)]
    pub settings: SettingsArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the relay (default)
    Serve,
    /// Load and validate configuration, then print the tenant table
    CheckConfig,
}

/// Settings that may come from flags, environment or the config file.
///
/// Everything is optional here; defaults are applied when the layers are
/// merged in `config::Settings::resolve`.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct SettingsArgs {
    /// TOML configuration file
    #[arg(long, short = 'c', global = true, env = "LIVERELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Downstream WebSocket listen address (default: 0.0.0.0:10000)
    #[arg(long, global = true, env = "LIVERELAY_WS_ADDR")]
    pub ws_addr: Option<SocketAddr>,

    /// Admin HTTP listen address (default: 0.0.0.0:10001)
    #[arg(long, global = true, env = "LIVERELAY_ADMIN_ADDR")]
    pub admin_addr: Option<SocketAddr>,

    /// Shared secret viewers must present (at least 16 characters)
    #[arg(long, global = true, env = "LIVERELAY_WS_SECRET", hide_env_values = true)]
    pub ws_secret: Option<String>,

    /// Secret for the admin routes; without it they answer 401
    #[arg(long, global = true, env = "LIVERELAY_ADMIN_SECRET", hide_env_values = true)]
    pub admin_secret: Option<String>,

    /// HTTP proxy for upstream connections (http://host:port)
    #[arg(long, global = true, env = "LIVERELAY_PROXY_URL")]
    pub proxy_url: Option<String>,

    /// Bridge endpoint template, `{source}` is replaced by the source id
    #[arg(long, global = true, env = "LIVERELAY_UPSTREAM_URL")]
    pub upstream_url: Option<String>,

    /// JSON array of {token, sourceId, active}
    #[arg(long, global = true, env = "LIVERELAY_TENANTS_JSON")]
    pub tenants_json: Option<String>,
}
