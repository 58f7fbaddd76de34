//! Scripted end-to-end runs of the demo modules.
//!
//! One server hosts the points service; every client runs a scoreboard and
//! adds points once per frame. Each side has its own [`SimEnv`], and all of
//! them share one [`LoopbackNetwork`], optionally lossy for unreliable
//! traffic.

use std::{path::Path, sync::Arc, time::Duration};

use knit_client::{ClientOptions, KnitClient};
use knit_core::{LoopbackNetwork, LoopbackStats, PeerId, Value, wire::as_i64};
use knit_server::{KnitServer, ServerOptions};
use serde::Deserialize;

use crate::{
    HarnessError, SimEnv, SimFrames,
    demo::{self, POINTS_SERVICE, ScoreboardStats},
};

/// Scenario settings, loadable from TOML.
///
/// ```toml
/// frames = 120
/// clients = 3
/// loss = 0.1
/// seed = 7
///
/// [server]
/// dispatch = "defer"
///
/// [client]
/// service_promises = false
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Frames to simulate.
    pub frames: u64,
    /// Frame length in milliseconds.
    pub frame_ms: u64,
    /// Connected clients.
    pub clients: usize,
    /// Points every client adds per frame.
    pub points_per_frame: i64,
    /// Drop probability for unreliable signals.
    pub loss: f64,
    /// Seed of the loss model.
    pub seed: u64,
    /// Server start options.
    pub server: ServerOptions,
    /// Start options shared by every client.
    pub client: ClientOptions,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            frames: 60,
            frame_ms: 16,
            clients: 2,
            points_per_frame: 1,
            loss: 0.0,
            seed: 0,
            server: ServerOptions::default(),
            client: ClientOptions::default(),
        }
    }
}

impl ScenarioConfig {
    /// Parse and validate a scenario.
    pub fn from_toml(text: &str) -> Result<Self, HarnessError> {
        let config: Self = knit_core::from_toml(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a scenario file.
    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| HarnessError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml(&text)
    }

    /// Check ranges serde cannot express.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.clients == 0 {
            return Err(HarnessError::Scenario("at least one client is required".to_string()));
        }
        if self.frame_ms == 0 {
            return Err(HarnessError::Scenario("frame_ms must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.loss) {
            return Err(HarnessError::Scenario(format!("loss {} is outside 0..=1", self.loss)));
        }
        Ok(())
    }
}

/// What one client observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientReport {
    /// Peer id on the network.
    pub peer: PeerId,
    /// Last replicated total.
    pub observed_total: Option<i64>,
    /// Unreliable heartbeat pings received.
    pub pings: u64,
    /// Scores by other clients received.
    pub scored: u64,
    /// Render frames the scoreboard saw.
    pub render_frames: u64,
    /// Failed spawned or deferred callbacks.
    pub faults: usize,
}

/// Outcome of a scenario run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    /// Frames simulated.
    pub frames: u64,
    /// Total held by the server at the end.
    pub server_total: i64,
    /// Per-client observations in connection order.
    pub clients: Vec<ClientReport>,
    /// Network delivery counters.
    pub network: LoopbackStats,
    /// Failed spawned or deferred server callbacks.
    pub server_faults: usize,
}

struct SimClient {
    peer: PeerId,
    env: SimEnv,
    frames: SimFrames,
    client: KnitClient<SimEnv>,
    stats: Arc<ScoreboardStats>,
}

/// Run a scenario to completion.
pub async fn run(config: &ScenarioConfig) -> Result<ScenarioReport, HarnessError> {
    config.validate()?;
    let network = if config.loss > 0.0 {
        LoopbackNetwork::with_unreliable_loss(config.loss, config.seed)
    } else {
        LoopbackNetwork::new()
    };
    let delta = Duration::from_millis(config.frame_ms);

    let server_env = SimEnv::new();
    let mut server_frames = SimFrames::server(server_env.clone());
    let server = KnitServer::with_env(server_env.clone(), Arc::new(network.clone()), server_frames.hub());
    server.create_service(demo::points_service())?;
    server.start(config.server.clone()).await?;
    settle(&server_env).await;

    let mut clients = Vec::with_capacity(config.clients);
    for _ in 0..config.clients {
        let env = SimEnv::new();
        let frames = SimFrames::client(env.clone());
        let transport = network.connect();
        let peer = transport.peer();
        let client = KnitClient::with_env(env.clone(), Arc::new(transport), frames.hub());
        let stats = Arc::new(ScoreboardStats::default());
        client.create_controller(demo::scoreboard(client.clone(), Arc::clone(&stats)))?;
        client.start(config.client.clone()).await?;
        settle(&env).await;
        clients.push(SimClient { peer, env, frames, client, stats });
    }
    tracing::info!(clients = clients.len(), frames = config.frames, "scenario started");

    for frame in 1..=config.frames {
        for sim in &clients {
            if let Some(proxy) = sim.stats.proxy() {
                proxy.method("AddPoints")?.call(vec![Value::from(config.points_per_frame)]).await?;
            }
        }
        step(&mut server_frames, &server_env, delta, frame).await?;
        for sim in &mut clients {
            step(&mut sim.frames, &sim.env, delta, frame).await?;
        }
    }

    let points = server.get_service(POINTS_SERVICE)?;
    let report = ScenarioReport {
        frames: config.frames,
        server_total: as_i64(&points.property("Total")?.get()).unwrap_or(0),
        clients: clients
            .iter()
            .map(|sim| ClientReport {
                peer: sim.peer,
                observed_total: sim.stats.latest_total(),
                pings: sim.stats.pings(),
                scored: sim.stats.scored(),
                render_frames: sim.stats.render_frames(),
                faults: sim.client.faults().len(),
            })
            .collect(),
        network: network.stats(),
        server_faults: server.faults().len(),
    };
    tracing::info!(
        total = report.server_total,
        delivered = report.network.delivered,
        dropped = report.network.dropped,
        "scenario finished"
    );
    Ok(report)
}

/// Step one frame, then let spawned and deferred callbacks finish.
async fn step(frames: &mut SimFrames, env: &SimEnv, delta: Duration, frame: u64) -> Result<(), HarnessError> {
    let errors = frames.step(delta);
    settle(env).await;
    match errors.into_iter().next() {
        Some(source) => Err(HarnessError::Frame { frame, source }),
        None => Ok(()),
    }
}

async fn settle(env: &SimEnv) {
    env.settle().await;
    env.flush_deferred();
}
