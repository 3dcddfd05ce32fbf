//! The host daemon binary: assembles the host singletons, installs the
//! global tracing subscriber, and serves broker calls over the sandbox
//! IPC transport until asked to shut down.

use std::path::PathBuf;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sandbox_host::{config::HostConfig, Host};

fn app_data_dir() -> PathBuf {
    std::env::var_os("SANDBOX_HOST_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/var/lib/connectias/sandbox-host"))
}

fn guestd_path() -> PathBuf {
    std::env::var_os("SANDBOX_GUESTD_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sandbox-guestd"))
}

fn config_path() -> Option<PathBuf> {
    std::env::var_os("SANDBOX_HOST_CONFIG").map(PathBuf::from)
}

fn host_version() -> semver::Version {
    std::env::var("SANDBOX_HOST_VERSION")
        .ok()
        .and_then(|v| semver::Version::parse(&v).ok())
        .unwrap_or_else(|| semver::Version::new(1, 0, 0))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "sandbox_host=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = HostConfig::load(app_data_dir(), config_path().as_deref())?;
    let host = Host::new(config, guestd_path(), host_version());

    tracing::info!(
        app_data_dir = %host.config.app_data_dir.display(),
        host_version = %host_version(),
        "sandbox host daemon starting"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("sandbox host daemon shutting down");
    Ok(())
}
