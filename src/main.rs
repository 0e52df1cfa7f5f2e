//! Avatar driver: receives face-tracking records over TCP and drives the
//! active avatar rig, forwarding its parameters over OSC.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use avatar_driver::config::Config;
use avatar_driver::osc::OscSink;
use avatar_driver::{AvatarRegistry, IngestServer, PoseSlot, Presentation, RigBackend, RigConsumer};

const CONFIG_PATH: &str = "avatar_driver.toml";

/// Presentation handle for one rig: only the active rig's frames are sent.
struct OutputGate {
    name: String,
    active: AtomicBool,
    slot: PoseSlot,
}

impl OutputGate {
    fn new(name: &str, slot: PoseSlot) -> Self {
        Self {
            name: name.to_string(),
            active: AtomicBool::new(false),
            slot,
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Presentation for OutputGate {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
        debug!("[{}] {}", self.name, if active { "shown" } else { "hidden" });
    }

    fn rig_consumer(&self) -> Option<Arc<dyn RigConsumer>> {
        Some(Arc::new(self.slot.clone()))
    }
}

enum Command {
    ToggleBlush,
}

async fn render_loop(
    mut rigs: Vec<(RigBackend, Arc<OutputGate>)>,
    osc: Option<OscSink>,
    target_fps: u32,
    mut commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
) {
    let frame_duration = Duration::from_secs_f64(1.0 / target_fps.max(1) as f64);
    let mut interval = tokio::time::interval(frame_duration);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last = Instant::now();
    let mut send_errors = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(command) = commands.recv() => match command {
                Command::ToggleBlush => {
                    for (rig, gate) in rigs.iter_mut().filter(|(_, g)| g.is_active()) {
                        if let RigBackend::Live2d(_) = rig {
                            info!("[{}] blush: {}", gate.name, rig.toggle_blush());
                        }
                    }
                }
            },
            _ = interval.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last).as_secs_f32();
                last = now;

                for (rig, _) in rigs.iter_mut().filter(|(_, g)| g.is_active()) {
                    let frame = rig.tick(dt);
                    if let Some(ref sink) = osc {
                        if let Err(e) = sink.send(&frame) {
                            send_errors += 1;
                            if send_errors == 1 {
                                warn!("OSC send failed: {}", e);
                            }
                        }
                    }
                }
            }
        }
    }
    if send_errors > 0 {
        warn!("{} OSC sends failed", send_errors);
    }
}

fn spawn_input_thread(registry: Arc<AvatarRegistry>, commands: mpsc::UnboundedSender<Command>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            match line.trim() {
                "q" => {
                    if let Err(e) = registry.next() {
                        warn!("[input] cannot switch avatar: {}", e);
                    }
                }
                "b" => {
                    if commands.send(Command::ToggleBlush).is_err() {
                        break;
                    }
                }
                _ => {}
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path);

    info!("Avatar Driver ({})", env!("CARGO_PKG_VERSION"));
    info!("Listen: {} ({:?})", config.server.listen_addr, config.server.framing);
    info!("Target FPS: {}", config.app.target_fps);

    let rigs: Vec<(RigBackend, Arc<OutputGate>)> = config
        .avatars
        .iter()
        .map(|avatar| {
            let backend = config.backend_for(avatar);
            let gate = Arc::new(OutputGate::new(&avatar.name, backend.slot().clone()));
            (backend, gate)
        })
        .collect();

    let registry = Arc::new(AvatarRegistry::discover_or_idle(
        rigs.iter().map(|(_, gate)| gate.clone() as Arc<dyn Presentation>),
    ));

    let osc = if config.osc.enabled {
        let sink = OscSink::new(&config.osc.target_addr)?;
        info!("OSC target: {}", sink.target_addr());
        Some(sink)
    } else {
        None
    };

    let server = IngestServer::start(&config.server, registry.clone())
        .await
        .context("failed to start ingestion server")?;

    let cancel = CancellationToken::new();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let render = tokio::spawn(render_loop(
        rigs,
        osc,
        config.app.target_fps,
        command_rx,
        cancel.clone(),
    ));

    spawn_input_thread(registry, command_tx);
    info!("[q] + Enter: next avatar, [b] + Enter: toggle blush, Ctrl-C: quit");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    cancel.cancel();
    server.stop().await?;
    render.await?;
    Ok(())
}
