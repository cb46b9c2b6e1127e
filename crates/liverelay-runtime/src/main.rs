mod admin;
mod cli;
mod config;
mod serve;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = std::env::var("LIVERELAY_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let settings = Settings::load(&cli.settings)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve::run(settings).await,
        Command::CheckConfig => {
            print_summary(&settings);
            Ok(())
        }
    }
}

fn print_summary(settings: &Settings) {
    println!("ws listener:    {}", settings.ws_addr);
    println!("admin listener: {}", settings.admin_addr);
    println!("upstream:       {}", settings.upstream_url);
    println!(
        "proxy:          {}",
        settings.proxy_url.as_deref().unwrap_or("(none)")
    );
    println!(
        "admin secret:   {}",
        if settings.admin_secret.is_some() { "set" } else { "unset, admin routes locked" }
    );
    println!();
    println!("{:<24} {:<24} ACTIVE", "TOKEN", "SOURCE");
    for tenant in &settings.tenants {
        println!(
            "{:<24} {:<24} {}",
            tenant.token,
            tenant.source_id,
            if tenant.active { "yes" } else { "no" }
        );
    }
    println!(
        "\n{} tenant(s), {} active",
        settings.tenants.len(),
        settings.active_tenants()
    );
}
