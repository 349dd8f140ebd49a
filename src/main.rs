//! Dashbridge server
//!
//! Run with: `dashbridge [--config PATH] [run|init-config]`
//!
//! Without `--config` the standard locations are searched
//! (`~/.config/dashbridge/config.toml`, `/etc/dashbridge/config.toml`,
//! `./config.toml`). `DASHBRIDGE_*` variables and `RUST_LOG` override the file.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dashbridge::api::{self, shutdown_signal, AppState};
use dashbridge::brightness::{BrightnessControl, NoBacklight, SysfsBacklight};
use dashbridge::command::CommandRouter;
use dashbridge::config::{generate_default_config, Config, ConfigOrigin, LoggingConfig};
use dashbridge::mqtt::{MqttBridge, StatePublisher};
use dashbridge::screenshot::ScreenshotPipeline;
use dashbridge::state::{ScreenshotStore, StateStore};
use dashbridge::upstream::UpstreamSubscriber;
use dashbridge::websocket::{ConnectionHub, HubConfig};

#[derive(Parser)]
#[command(name = "dashbridge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bridge a home-automation controller to dashboards and MQTT")]
struct Cli {
    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge (default)
    Run,

    /// Write a commented default config file
    InitConfig {
        /// Output path (default: ./config.toml)
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::InitConfig { output, force } => init_config(&output, force),
        Commands::Run => {
            let (config, origin) = match &cli.config {
                Some(path) => (
                    Config::load_with_env(path).with_context(|| format!("loading {}", path.display()))?,
                    ConfigOrigin::file(path),
                ),
                None => Config::load_default(),
            };
            init_tracing(&config.logging);
            origin.log();
            run(config).await
        }
    }
}

fn init_config(output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }
    std::fs::write(output, generate_default_config())
        .with_context(|| format!("writing {}", output.display()))?;
    println!("Wrote {}", output.display());
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("dashbridge={},tower_http=info", logging.level).into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting Dashbridge v{}", env!("CARGO_PKG_VERSION"));

    let shutdown = CancellationToken::new();
    let store = Arc::new(StateStore::new());
    let screenshots = Arc::new(ScreenshotStore::new());
    let hub = Arc::new(ConnectionHub::new(HubConfig::default()));
    let controller = Arc::new(config.controller.clone());

    if controller.token.is_empty() {
        tracing::warn!("No controller token configured, authentication will be rejected");
    }

    // The MQTT handle has to exist before anything that publishes through it
    let (mqtt_bridge, publisher) = if config.mqtt.enabled {
        let (bridge, handle) = MqttBridge::new(&config.mqtt, Arc::clone(&store));
        tracing::info!(broker = %config.mqtt.broker, device_id = %config.mqtt.device_id, "MQTT bridge enabled");
        (Some(bridge), Some(Arc::new(handle) as Arc<dyn StatePublisher>))
    } else {
        tracing::warn!("MQTT disabled, running without broker integration");
        (None, None)
    };

    let pipeline = Arc::new(ScreenshotPipeline::new(
        Arc::clone(&hub),
        Arc::clone(&screenshots),
        publisher.clone(),
    ));

    let subscriber = UpstreamSubscriber::new(Arc::clone(&controller), Arc::clone(&hub), shutdown.clone());

    let mut tasks = JoinSet::new();

    if let Some(bridge) = mqtt_bridge {
        let brightness: Arc<dyn BrightnessControl> = match &config.display.backlight_dir {
            Some(dir) => Arc::new(SysfsBacklight::new(dir)),
            None => Arc::new(NoBacklight),
        };
        let router = Arc::new(CommandRouter::new(
            Arc::clone(&store),
            Arc::clone(&hub),
            Arc::clone(&pipeline),
            publisher.clone(),
            brightness,
            config.display.min_brightness,
        ));
        tasks.spawn(bridge.run(router, shutdown.clone()));
    }

    let state = AppState::new(
        store,
        screenshots,
        hub,
        pipeline,
        publisher,
        controller,
        subscriber.state(),
    );

    tasks.spawn(subscriber.run());

    let server_config = config.server.clone();
    let server_shutdown = shutdown.clone();
    tasks.spawn(async move {
        if let Err(e) = api::serve(state, &server_config, server_shutdown.clone()).await {
            tracing::error!(error = %e, "HTTP server failed");
            server_shutdown.cancel();
        }
    });

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    let drained = tokio::time::timeout(grace, async {
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Task ended abnormally");
            }
        }
    })
    .await;

    if drained.is_err() {
        tracing::warn!(grace = ?grace, "Grace period elapsed, aborting remaining tasks");
        tasks.shutdown().await;
    }

    tracing::info!("Dashbridge stopped");
    Ok(())
}
