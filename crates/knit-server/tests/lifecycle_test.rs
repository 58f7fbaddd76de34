//! Server startup tests

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use knit_core::{
    DispatchMode, FaultOrigin, InitFailureKind, KnitError, LoopbackNetwork, StartupState, Tick,
    TickHub, TickPhase,
};
use knit_server::{KnitServer, ServerOptions, ServiceDef};
use parking_lot::Mutex;

fn server() -> (KnitServer, Arc<TickHub>) {
    let hub = Arc::new(TickHub::new());
    let server = KnitServer::new(Arc::new(LoopbackNetwork::new()), hub.clone());
    (server, hub)
}

fn inline() -> ServerOptions {
    ServerOptions::default().with_dispatch(DispatchMode::Inline)
}

fn tick(n: u64) -> Tick {
    Tick { time: Duration::from_millis(16 * n), delta: Duration::from_millis(16) }
}

#[tokio::test]
async fn registration_rules() {
    let (server, _) = server();

    server.create_service(ServiceDef::new("PointsService")).unwrap();
    assert!(matches!(
        server.create_service(ServiceDef::new("PointsService")),
        Err(KnitError::DuplicateName { name }) if name == "PointsService"
    ));
    assert!(matches!(server.create_service(ServiceDef::new("")), Err(KnitError::InvalidDefinition { .. })));
    assert!(matches!(
        server.create_service(ServiceDef::new("Camera").on_frame(TickPhase::RenderStepped, |_, _| Ok(()))),
        Err(KnitError::InvalidDefinition { .. })
    ));
    assert!(matches!(server.get_service("PointsService"), Err(KnitError::NotStarted)));

    server.start(inline()).await.unwrap();

    assert!(matches!(server.create_service(ServiceDef::new("Late")), Err(KnitError::AlreadyStarted)));
    assert!(matches!(server.get_service("Missing"), Err(KnitError::NotFound { .. })));
    assert_eq!(server.services().unwrap().len(), 1);
}

#[tokio::test]
async fn failing_init_does_not_stop_siblings() {
    let (server, _) = server();
    let completed = Arc::new(AtomicUsize::new(0));

    for i in 0..8 {
        let completed = Arc::clone(&completed);
        let def = ServiceDef::new(format!("Service{i}")).on_init(move |_| {
            let completed = Arc::clone(&completed);
            async move {
                tokio::task::yield_now().await;
                if i == 3 {
                    return Err("service 3 cannot init".into());
                }
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        server.create_service(def).unwrap();
    }

    let report = server.start(inline()).await.unwrap();

    assert_eq!(completed.load(Ordering::SeqCst), 7);
    assert_eq!(report.completed.len(), 7);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].module, "Service3");
    assert_eq!(
        report.failures[0].kind,
        InitFailureKind::Failed("service 3 cannot init".to_string())
    );
    assert_eq!(server.state(), StartupState::Started);
}

#[tokio::test]
async fn init_runs_after_binding_and_sees_siblings() {
    let (server, _) = server();
    let observed = Arc::new(Mutex::new(None));

    let sink = Arc::clone(&observed);
    server
        .create_service(ServiceDef::new("Reader").on_init(move |ctx| {
            let points = ctx
                .sibling("Points")
                .and_then(|points| points.property("Total").map(|p| p.get()))
                .ok();
            *sink.lock() = points;
            async { Ok(()) }
        }))
        .unwrap();
    server.create_service(ServiceDef::new("Points").property("Total", 99)).unwrap();

    server.start(inline()).await.unwrap();
    assert_eq!(*observed.lock(), Some(knit_core::Value::from(99)));
}

#[tokio::test]
async fn verify_init_flags_suspension() {
    let (server, _) = server();
    server
        .create_service(ServiceDef::new("Sleepy").on_init(|_| async {
            tokio::task::yield_now().await;
            Ok(())
        }))
        .unwrap();
    server.create_service(ServiceDef::new("Eager").on_init(|_| async { Ok(()) })).unwrap();

    let options = ServerOptions { verify_init: true, ..inline() };
    let report = server.start(options).await.unwrap();

    assert_eq!(report.completed, ["Eager"]);
    assert!(matches!(
        report.failures[0].to_error(),
        KnitError::SuspensionViolation { module } if module == "Sleepy"
    ));
}

#[tokio::test]
async fn start_twice_fails_and_keeps_state() {
    let (server, hub) = server();
    let beats = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&beats);
    server
        .create_service(ServiceDef::new("Clock").on_heartbeat(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();

    server.start(inline()).await.unwrap();
    assert!(matches!(server.start(inline()).await, Err(KnitError::AlreadyStarted)));

    assert_eq!(server.queue_len(TickPhase::Heartbeat), 1);
    assert_eq!(hub.subscriber_count(TickPhase::Heartbeat), 1);
    hub.fire(TickPhase::Heartbeat, tick(1));
    assert_eq!(beats.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn on_start_releases_early_and_late_waiters() {
    let (server, _) = server();
    let early: Vec<_> = (0..3).map(|_| tokio::spawn(server.on_start())).collect();

    let started = server.clone();
    let runner = tokio::spawn(async move { started.start(ServerOptions::default()).await });

    for waiter in early {
        waiter.await.unwrap();
    }
    runner.await.unwrap().unwrap();
    server.on_start().await;
    assert!(server.is_started());
}

#[tokio::test]
async fn frame_callbacks_fire_in_registration_order() {
    let (server, hub) = server();
    let log = Arc::new(Mutex::new(Vec::new()));

    for name in ["c1", "c2", "c3"] {
        let log = Arc::clone(&log);
        server
            .create_service(ServiceDef::new(name).on_frame(TickPhase::PostSimulation, move |service, _| {
                log.lock().push(service.name().to_owned());
                Ok(())
            }))
            .unwrap();
    }
    server.start(inline()).await.unwrap();

    for n in 1..=3 {
        assert!(hub.fire(TickPhase::PostSimulation, tick(n)).is_empty());
    }
    assert_eq!(*log.lock(), ["c1", "c2", "c3", "c1", "c2", "c3", "c1", "c2", "c3"]);
}

#[tokio::test]
async fn inline_start_failure_aborts_startup() {
    let (server, _) = server();
    server.create_service(ServiceDef::new("Broken").on_start(|_| async { Err("no config".into()) })).unwrap();

    let result = server.start(inline()).await;

    assert!(matches!(result, Err(KnitError::StartHook { module, .. }) if module == "Broken"));
    assert_eq!(server.state(), StartupState::Starting);
    assert!(!server.is_started());
}

#[tokio::test]
async fn spawned_start_failure_goes_to_fault_log() {
    let (server, _) = server();
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    server.create_service(ServiceDef::new("Broken").on_start(|_| async { Err("no config".into()) })).unwrap();
    server
        .create_service(ServiceDef::new("Fine").on_start(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        }))
        .unwrap();

    server.start(ServerOptions::default()).await.unwrap();
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }

    assert!(server.is_started());
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    let faults = server.faults().snapshot();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].module, "Broken");
    assert_eq!(faults[0].origin, FaultOrigin::Start);
}

#[tokio::test]
async fn start_hooks_may_suspend_under_every_mode() {
    for mode in [DispatchMode::Inline, DispatchMode::Spawn, DispatchMode::Defer] {
        let (server, _) = server();
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["Shop", "Bank"] {
            let log = Arc::clone(&log);
            server
                .create_service(ServiceDef::new(name).on_start(move |service| {
                    let log = Arc::clone(&log);
                    async move {
                        tokio::task::yield_now().await;
                        tokio::task::yield_now().await;
                        log.lock().push(service.name().to_owned());
                        Ok(())
                    }
                }))
                .unwrap();
        }

        server.start(ServerOptions::default().with_dispatch(mode)).await.unwrap();
        if mode == DispatchMode::Inline {
            assert_eq!(*log.lock(), ["Shop", "Bank"]);
        }
        for _ in 0..64 {
            if log.lock().len() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }

        let mut seen = log.lock().clone();
        seen.sort();
        assert_eq!(seen, ["Bank", "Shop"], "{mode}");
        assert!(server.faults().is_empty(), "{mode}");
    }
}
