//! Demo game modules: a points service and a scoreboard controller.

use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicU64, Ordering},
};

use knit_client::{ControllerDef, KnitClient, ServiceProxy};
use knit_core::{Environment, Value, wire::as_i64};
use knit_server::ServiceDef;
use parking_lot::Mutex;

/// Name the points service registers under.
pub const POINTS_SERVICE: &str = "PointsService";

/// Server-side points tally.
///
/// - `AddPoints(n)` adds `n` to `Total` and returns the new total
/// - `Scored(peer, n)` goes to every other peer when someone scores
/// - `Ping(ms)` is fired unreliably to everyone on each heartbeat
/// - `Total` replicates the running total
pub fn points_service() -> ServiceDef {
    ServiceDef::new(POINTS_SERVICE)
        .property("Total", 0)
        .signal("Scored")
        .unreliable_signal("Ping")
        .value("MaxPoints", 1_000)
        .method("AddPoints", |service, peer, args| {
            let points = args.first().and_then(as_i64).ok_or("AddPoints expects an integer")?;
            let total = service.property("Total")?;
            let next = as_i64(&total.get()).unwrap_or(0).saturating_add(points);
            total.set(Value::from(next))?;
            service.signal("Scored")?.fire_except(peer, &vec![Value::from(peer), Value::from(points)])?;
            Ok(vec![Value::from(next)])
        })
        .on_heartbeat(|service, tick| {
            let millis = u64::try_from(tick.time.as_millis()).unwrap_or(u64::MAX);
            service.signal("Ping")?.fire_all(&vec![Value::from(millis)])?;
            Ok(())
        })
}

/// What the scoreboard saw.
#[derive(Default)]
pub struct ScoreboardStats {
    proxy: OnceLock<ServiceProxy>,
    latest_total: Mutex<Option<i64>>,
    pings: AtomicU64,
    scored: AtomicU64,
    render_frames: AtomicU64,
}

impl ScoreboardStats {
    /// Points proxy, once the scoreboard initialized.
    pub fn proxy(&self) -> Option<&ServiceProxy> {
        self.proxy.get()
    }

    /// Last replicated total.
    pub fn latest_total(&self) -> Option<i64> {
        *self.latest_total.lock()
    }

    /// Heartbeat pings received.
    pub fn pings(&self) -> u64 {
        self.pings.load(Ordering::Relaxed)
    }

    /// Scores by other peers received.
    pub fn scored(&self) -> u64 {
        self.scored.load(Ordering::Relaxed)
    }

    /// Render frames seen.
    pub fn render_frames(&self) -> u64 {
        self.render_frames.load(Ordering::Relaxed)
    }
}

/// Client-side scoreboard tracking the points service.
pub fn scoreboard<E: Environment>(client: KnitClient<E>, stats: Arc<ScoreboardStats>) -> ControllerDef {
    let frames = Arc::clone(&stats);
    ControllerDef::new("Scoreboard")
        .on_init(move |_| {
            let client = client.clone();
            let stats = Arc::clone(&stats);
            async move {
                let proxy = client.get_service(POINTS_SERVICE).await?;

                let sink = Arc::clone(&stats);
                proxy.property("Total")?.observe(move |total| *sink.latest_total.lock() = as_i64(total));
                let sink = Arc::clone(&stats);
                proxy.signal("Ping")?.connect(move |_| {
                    sink.pings.fetch_add(1, Ordering::Relaxed);
                });
                let sink = Arc::clone(&stats);
                proxy.signal("Scored")?.connect(move |_| {
                    sink.scored.fetch_add(1, Ordering::Relaxed);
                });

                let _ = stats.proxy.set(proxy);
                Ok(())
            }
        })
        .on_render_stepped(move |_, _| {
            frames.render_frames.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
}
