//! # relay-daemon
//!
//! `relayd` binary: loads settings, opens the membership store and serves
//! the relay hub until interrupted.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use relay_server::{Hub, RelayServer, ServerConfig};
use relay_settings::RelaySettings;
use relay_store::SqliteSnapshotStore;

/// Realtime room hub server.
#[derive(Parser, Debug)]
#[command(name = "relayd", about = "Realtime room hub server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` membership database (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Settings file (default `~/.relay/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `relay_server=trace`.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Load settings from file and environment, then apply flags on top.
    fn resolve_settings(&self) -> Result<RelaySettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(relay_settings::settings_path);
        let mut settings = relay_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;

        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(db_path) = &self.db_path {
            settings.storage.db_path = Some(db_path.to_string_lossy().into_owned());
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

/// Build the hub and server from resolved settings.
fn build_server(settings: &RelaySettings) -> Result<RelayServer> {
    let db_path = settings.storage.resolved_db_path();
    ensure_parent_dir(&db_path)?;
    let store = SqliteSnapshotStore::open(&db_path, settings.storage.snapshot_key.clone())
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let config = ServerConfig::from(settings);
    let hub = Hub::new(config.hub_config(), Arc::new(store));
    if !hub.restored_rooms().is_empty() {
        tracing::info!(rooms = ?hub.restored_rooms(), "previous membership restored");
    }

    let server = RelayServer::new(config, hub);
    Ok(match relay_server::metrics::install_recorder() {
        Ok(handle) => server.with_metrics(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder not installed");
            server
        }
    })
}

/// Resolve on ctrl-c or, on unix, SIGTERM.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for ctrl-c")?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.resolve_settings()?;
    relay_logging::init_subscriber(&settings.logging).context("Failed to initialize logging")?;

    let server = build_server(&settings)?;
    let (addr, _serve) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("relay hub listening on http://{addr} (ws://{addr}/ws)");

    shutdown_signal().await?;

    tracing::info!("Shutting down...");
    if !server.stop().await {
        tracing::warn!("server did not drain within the shutdown timeout");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("relayd").chain(args.iter().copied()))
    }

    #[test]
    fn flags_are_optional() {
        let args = cli(&[]);
        assert!(args.host.is_none());
        assert!(args.port.is_none());
        assert!(args.db_path.is_none());
    }

    #[test]
    fn flags_override_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings_path = dir.path().join("settings.json");
        std::fs::write(
            &settings_path,
            r#"{"server": {"host": "10.0.0.1", "port": 9000}, "logging": {"level": "warn"}}"#,
        )
        .unwrap();

        let args = cli(&[
            "--settings",
            settings_path.to_str().unwrap(),
            "--port",
            "9100",
            "--log-level",
            "debug",
        ]);
        let settings = args.resolve_settings().unwrap();
        assert_eq!(settings.server.host, "10.0.0.1");
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings_path = dir.path().join("settings.json");
        std::fs::write(&settings_path, "{ nope").unwrap();
        let args = cli(&["--settings", settings_path.to_str().unwrap()]);
        assert!(args.resolve_settings().is_err());
    }

    #[test]
    fn ensure_parent_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("relay.db");
        ensure_parent_dir(&path).unwrap();
        assert!(path.parent().unwrap().is_dir());
    }

    #[tokio::test]
    async fn server_boots_and_responds() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("data").join("relay.db");
        let mut settings = RelaySettings::default();
        settings.server.host = "127.0.0.1".into();
        settings.server.port = 0;
        settings.storage.db_path = Some(db_path.to_string_lossy().into_owned());

        let server = build_server(&settings).unwrap();
        let (addr, _handle) = server.listen().await.unwrap();
        assert!(db_path.exists());

        let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert!(resp.status().is_success());

        let clean = tokio::time::timeout(std::time::Duration::from_secs(10), server.stop())
            .await
            .expect("shutdown timed out");
        assert!(clean);
    }
}
