mod animation;
mod bridge;
mod config;
mod events;
mod geometry;
mod gesture;
mod ipc;
mod menu;
mod overlay;
mod permission;
mod platform;
mod registry;
mod service;
mod store;
mod surface;
#[cfg(feature = "tray")]
mod tray;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::bridge::{BridgeCommand, BridgeResponse, OverlayBridge};
use crate::config::{DaemonConfig, OverlayConfig, default_state_dir};
use crate::events::EventEmitter;
use crate::geometry::Screen;
use crate::permission::{OverlayPermissions, PermissionGate};
use crate::permission::desktop::DesktopPermissions;
use crate::platform::HeadlessCompositor;
use crate::service::{ServiceNotice, UiDispatcher, UiRequest};
use crate::store::PositionStore;
use crate::surface::Compositor;

const LOG_ENV: &str = "SPARK_BUBBLE_LOG";

#[derive(Debug, Parser)]
#[command(name = "spark-bubble", version, about = "Floating quick-action bubble")]
struct Cli {
    /// Daemon socket (defaults to the user runtime directory)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the bubble daemon
    Daemon(DaemonArgs),
    /// Show the bubble
    Start,
    /// Remove the bubble
    Stop,
    /// Set the number shown on the bubble
    Count {
        #[arg(allow_negative_numbers = true)]
        value: i64,
    },
    /// Close the quick-action menu
    Collapse,
    /// Print whether the menu is open
    Expanded,
    /// Print whether overlays are allowed
    CanDraw,
    /// Ask the user to allow overlays
    RequestPermission,
    /// Withdraw the overlay grant; a running bubble stops on its next command
    RevokePermission {
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
    /// Hand a route to the host application
    Route {
        route: String,
        #[arg(long)]
        auto_record: bool,
    },
    /// Print bubble events as JSON lines
    Listen,
}

#[derive(Debug, Args)]
struct DaemonArgs {
    /// Pixels per dp
    #[arg(long, default_value_t = 1.0)]
    density: f32,
    /// Output size used when no display is available, as WIDTHxHEIGHT
    #[arg(long, default_value = "1080x1920", value_parser = parse_screen)]
    screen: (i32, i32),
    #[arg(long)]
    state_dir: Option<PathBuf>,
    /// Seconds to wait for the permission prompt
    #[arg(long, default_value_t = 20)]
    permission_timeout: u64,
    /// Program launched with route arguments when no host is listening
    #[arg(long)]
    host_command: Option<String>,
    /// Keep surfaces in memory instead of on screen
    #[arg(long)]
    headless: bool,
}

impl DaemonArgs {
    fn into_config(self) -> DaemonConfig {
        DaemonConfig {
            overlay: OverlayConfig::default(),
            state_dir: self.state_dir.unwrap_or_else(default_state_dir),
            permission_timeout: Duration::from_secs(self.permission_timeout),
            host_command: self
                .host_command
                .map(|cmd| cmd.split_whitespace().map(str::to_string).collect()),
            density: self.density,
            headless_screen: self.screen,
            headless: self.headless,
        }
    }
}

fn parse_screen(raw: &str) -> Result<(i32, i32), String> {
    let (w, h) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {:?}", raw))?;
    let w = w.trim().parse::<i32>().map_err(|e| format!("bad width: {}", e))?;
    let h = h.trim().parse::<i32>().map_err(|e| format!("bad height: {}", e))?;
    if w <= 0 || h <= 0 {
        return Err("screen size must be positive".into());
    }
    Ok((w, h))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let socket = cli.socket.unwrap_or_else(ipc::socket_path);
    match cli.command {
        Command::Daemon(args) => run_daemon(args.into_config(), &socket),
        Command::RevokePermission { state_dir } => {
            revoke_permission(&state_dir.unwrap_or_else(default_state_dir))
        }
        other => run_client(other, &socket),
    }
}

fn run_daemon(config: DaemonConfig, socket: &Path) -> Result<()> {
    info!("Starting spark-bubble daemon");
    let store = PositionStore::open(&config.state_dir)?;
    let events = EventEmitter::new();
    let permissions: Arc<dyn OverlayPermissions> =
        Arc::new(DesktopPermissions::new(&config.state_dir));
    let gate = PermissionGate::new(permissions.clone(), events.clone(), config.permission_timeout);

    let (ui_tx, ui_rx) = mpsc::unbounded_channel();
    let (notice_tx, notice_rx) = mpsc::unbounded_channel();
    let bridge = OverlayBridge::new(ui_tx.clone(), gate, events, config.host_command.clone());

    // Host-facing work runs on worker threads; surfaces stay on this one
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let listener = {
        let _guard = runtime.enter();
        ipc::bind(socket)?
    };
    info!("Listening on {:?}", socket);
    runtime.spawn(ipc::serve(listener, bridge.clone()));
    runtime.spawn(bridge.clone().run_notices(notice_rx));
    runtime.spawn(shutdown_on_signal(bridge));

    let result = run_ui(&config, store, permissions, ui_tx, ui_rx, notice_tx);

    runtime.shutdown_timeout(Duration::from_secs(1));
    let _ = std::fs::remove_file(socket);
    info!("Daemon stopped");
    result
}

fn run_ui(
    config: &DaemonConfig,
    store: PositionStore,
    permissions: Arc<dyn OverlayPermissions>,
    ui_tx: mpsc::UnboundedSender<UiRequest>,
    ui_rx: mpsc::UnboundedReceiver<UiRequest>,
    notices: mpsc::UnboundedSender<ServiceNotice>,
) -> Result<()> {
    #[cfg(feature = "layer-shell")]
    {
        if !config.headless {
            let overlay = config.overlay.clone();
            return platform::layer_shell::run(
                config.density,
                config.headless_screen,
                Box::new(move |make_compositor| {
                    let dispatcher =
                        UiDispatcher::new(make_compositor, permissions, overlay, store, notices);
                    with_status(dispatcher, ui_tx)
                }),
                ui_rx,
            );
        }
    }
    #[cfg(not(feature = "layer-shell"))]
    {
        if !config.headless {
            warn!("Built without layer-shell support; running headless");
        }
    }

    let (width, height) = config.headless_screen;
    let screen = Screen::new(width, height, config.density);
    let dispatcher = with_status(
        UiDispatcher::new(
            move || HeadlessCompositor::new(screen),
            permissions,
            config.overlay.clone(),
            store,
            notices,
        ),
        ui_tx,
    );

    let local_runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start UI runtime")?;
    LocalSet::new().block_on(&local_runtime, platform::run_headless(dispatcher, ui_rx));
    Ok(())
}

#[cfg(feature = "tray")]
fn with_status<C: Compositor + 'static>(
    dispatcher: UiDispatcher<C>,
    requests: mpsc::UnboundedSender<UiRequest>,
) -> UiDispatcher<C> {
    dispatcher.with_status(Box::new(move || {
        Some(Box::new(tray::spawn_tray(requests.clone())) as Box<dyn service::StatusIndicator>)
    }))
}

#[cfg(not(feature = "tray"))]
fn with_status<C: Compositor + 'static>(
    dispatcher: UiDispatcher<C>,
    _requests: mpsc::UnboundedSender<UiRequest>,
) -> UiDispatcher<C> {
    dispatcher
}

async fn shutdown_on_signal(bridge: OverlayBridge) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
    info!("Shutdown signal received");
    bridge.shutdown();
}

fn revoke_permission(state_dir: &Path) -> Result<()> {
    let permissions = DesktopPermissions::new(state_dir);
    permissions
        .set_granted(false)
        .with_context(|| format!("Failed to update {:?}", permissions.grant_path()))?;
    println!("Overlay permission revoked ({})", permissions.grant_path().display());
    Ok(())
}

fn client_command(command: Command) -> Option<BridgeCommand> {
    Some(match command {
        Command::Start => BridgeCommand::StartOverlay,
        Command::Stop => BridgeCommand::StopOverlay,
        Command::Count { value } => BridgeCommand::UpdateCount(value),
        Command::Collapse => BridgeCommand::CollapseOverlay,
        Command::Expanded => BridgeCommand::IsExpanded,
        Command::CanDraw => BridgeCommand::CanDrawOverlays,
        Command::RequestPermission => BridgeCommand::RequestOverlayPermission,
        Command::Route { route, auto_record } => BridgeCommand::RouteIntent { route, auto_record },
        Command::Daemon(_) | Command::RevokePermission { .. } | Command::Listen => return None,
    })
}

fn run_client(command: Command, socket: &Path) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let Some(request) = client_command(command) else {
            let mut stream = ipc::EventStream::connect(socket)
                .await
                .with_context(|| format!("Is the daemon running? ({:?})", socket))?;
            while let Some(event) = stream.next().await? {
                println!("{}", serde_json::to_string(&event)?);
            }
            return Ok(());
        };

        let response = ipc::send_command(socket, &request)
            .await
            .with_context(|| format!("Is the daemon running? ({:?})", socket))?;
        match response {
            BridgeResponse::Ack => Ok(()),
            BridgeResponse::Bool(value) => {
                println!("{}", value);
                Ok(())
            }
            BridgeResponse::Error(body) => anyhow::bail!("{}: {}", body.code, body.message),
        }
    })
}
