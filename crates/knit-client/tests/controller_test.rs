//! Controller lifecycle tests

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use knit_client::{ClientOptions, ControllerDef, KnitClient};
use knit_core::{
    Args, ChannelKey, DispatchMode, KnitError, LoopbackNetwork, ManifestEntry, MemberKind, RemoteError,
    ServerTransport, StartupState, SurfaceManifest, Tick, TickHub, TickPhase, Value,
};
use parking_lot::Mutex;

fn client(network: &LoopbackNetwork) -> (KnitClient, Arc<TickHub>) {
    let hub = Arc::new(TickHub::new());
    let client = KnitClient::new(Arc::new(network.connect()), hub.clone());
    (client, hub)
}

fn inline() -> ClientOptions {
    ClientOptions::default().with_dispatch(DispatchMode::Inline)
}

fn tick(n: u64) -> Tick {
    Tick { time: Duration::from_millis(16 * n), delta: Duration::from_millis(16) }
}

#[tokio::test]
async fn controller_registry_follows_startup() {
    let (client, _) = client(&LoopbackNetwork::new());

    client.create_controllers([ControllerDef::new("Hud"), ControllerDef::new("Input")]).unwrap();
    assert!(matches!(client.create_controller(ControllerDef::new("Hud")), Err(KnitError::DuplicateName { .. })));
    assert!(matches!(client.get_controller("Hud"), Err(KnitError::NotStarted)));
    assert_eq!(client.state(), StartupState::NotStarted);

    client.start(inline()).await.unwrap();

    assert_eq!(client.state(), StartupState::Started);
    assert_eq!(client.get_controller("Input").unwrap().name(), "Input");
    let names: Vec<String> = client.controllers().unwrap().iter().map(|c| c.name().to_owned()).collect();
    assert_eq!(names, ["Hud", "Input"]);
    assert!(matches!(client.start(inline()).await, Err(KnitError::AlreadyStarted)));
}

#[tokio::test]
async fn render_phases_are_ticked_on_the_client() {
    let (client, hub) = client(&LoopbackNetwork::new());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    client
        .create_controller(ControllerDef::new("Camera").on_render_stepped(move |camera, tick| {
            sink.lock().push((camera.name().to_owned(), tick.delta));
            Ok(())
        }))
        .unwrap();
    client.start(inline()).await.unwrap();

    assert_eq!(client.queue_len(TickPhase::RenderStepped), 1);
    assert_eq!(client.queue_len(TickPhase::Heartbeat), 0);
    assert!(hub.fire(TickPhase::RenderStepped, tick(1)).is_empty());
    assert!(hub.fire(TickPhase::RenderStepped, tick(2)).is_empty());

    let frame = ("Camera".to_owned(), Duration::from_millis(16));
    assert_eq!(*seen.lock(), [frame.clone(), frame]);
}

#[tokio::test]
async fn init_hooks_can_fetch_service_proxies() {
    let network = LoopbackNetwork::new();
    let entries = vec![ManifestEntry { name: "Add".into(), kind: MemberKind::Method }];
    network.publish("Points", SurfaceManifest { entries }).unwrap();
    let (client, _) = client(&network);
    let fetched = Arc::new(AtomicUsize::new(0));

    let handle = client.clone();
    let counter = Arc::clone(&fetched);
    client
        .create_controller(ControllerDef::new("Hud").on_init(move |_| {
            let client = handle.clone();
            let counter = Arc::clone(&counter);
            async move {
                let proxy = client.get_service("Points").await?;
                proxy.method("Add")?;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }))
        .unwrap();
    let report = client.start(ClientOptions::default()).await.unwrap();

    assert!(report.is_clean());
    assert_eq!(fetched.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn start_hook_can_await_a_remote_call() {
    let network = LoopbackNetwork::new();
    network
        .serve(
            ChannelKey::new("Points", "Total"),
            Arc::new(|_, _: Args| Box::pin(async { Ok::<_, RemoteError>(vec![Value::from(10)]) })),
        )
        .unwrap();
    let entries = vec![ManifestEntry { name: "Total".into(), kind: MemberKind::Method }];
    network.publish("Points", SurfaceManifest { entries }).unwrap();
    let (client, _) = client(&network);
    let total = Arc::new(Mutex::new(None));

    let handle = client.clone();
    let sink = Arc::clone(&total);
    client
        .create_controller(ControllerDef::new("Hud").on_start(move |_| {
            let client = handle.clone();
            let sink = Arc::clone(&sink);
            async move {
                let proxy = client.get_service("Points").await?;
                let values = proxy.method("Total")?.call(Vec::new()).await?;
                *sink.lock() = values.first().cloned();
                Ok(())
            }
        }))
        .unwrap();
    client.start(inline()).await.unwrap();

    assert_eq!(*total.lock(), Some(Value::from(10)));
}

#[tokio::test]
async fn on_start_resolves_for_early_and_late_waiters() {
    let (client, _) = client(&LoopbackNetwork::new());
    let early = tokio::spawn(client.on_start());

    client.start(ClientOptions::default()).await.unwrap();

    early.await.unwrap();
    client.on_start().await;
    assert!(client.is_started());
}

#[tokio::test]
async fn invalid_options_leave_client_unstarted() {
    let (client, _) = client(&LoopbackNetwork::new());
    let bad = ClientOptions::default().with_service_middleware("", knit_core::MiddlewareSet::new());

    assert!(matches!(client.start(bad).await, Err(KnitError::InvalidConfig { .. })));
    assert_eq!(client.state(), StartupState::NotStarted);
    client.start(ClientOptions::default()).await.unwrap();
}
