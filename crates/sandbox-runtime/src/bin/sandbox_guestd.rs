//! The sandbox child binary the host's `PluginSupervisor` spawns per
//! loaded plugin. Connects back to the Unix socket the
//! supervisor bound before spawning, completes the identity handshake,
//! then drives the plugin's declarative flows until the host asks it to
//! shut down or the connection is lost.

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sandbox_runtime::{PluginLoader, PluginRuntime, RuntimeConfig};
use sandbox_types::PluginId;

#[derive(Parser, Debug)]
#[command(name = "sandbox-guestd")]
struct Args {
    #[arg(long = "plugin-id")]
    plugin_id: String,

    #[arg(long = "bundle")]
    bundle: PathBuf,

    #[arg(long = "ipc-socket")]
    ipc_socket: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let plugin_id = PluginId::new(&args.plugin_id)
        .map_err(|e| anyhow::anyhow!("invalid --plugin-id '{}': {e}", args.plugin_id))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "sandbox_runtime=info".into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let span = tracing::info_span!("sandbox", plugin = %plugin_id);
    let _enter = span.enter();
    tracing::info!(bundle = %args.bundle.display(), socket = %args.ipc_socket.display(), "sandbox guest starting");

    let bundle = PluginLoader::load(&args.bundle).await?;

    let config = RuntimeConfig::builder(plugin_id, args.bundle.clone(), args.ipc_socket.clone()).build();
    let runtime = PluginRuntime::new(config, bundle.manifest.clone());

    let proxy = runtime.connect(&bundle.content_digest).await?;
    tracing::info!("handshake accepted, sandbox is now running");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::select! {
        () = runtime.run(&proxy, shutdown_rx) => {}
        _ = tokio::signal::ctrl_c() => {
            let _ = shutdown_tx.send(true);
        }
    }

    let _ = proxy.shutdown().await;
    tracing::info!("sandbox guest shutting down");
    Ok(())
}
