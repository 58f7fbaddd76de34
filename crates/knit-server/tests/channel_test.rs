//! Server channel tests

use std::sync::Arc;

use knit_core::{
    Args, CallContext, ChannelKey, ClientSignal, ClientTransport, Delivery, Flow, LoopbackClient,
    KnitError, LoopbackNetwork, MiddlewareSet, PeerId, TickHub, Value,
};
use knit_server::{KnitServer, Service, ServerOptions, ServiceDef};
use parking_lot::Mutex;

struct Fixture {
    network: LoopbackNetwork,
    service: Service,
}

async fn start(def: ServiceDef) -> Fixture {
    let network = LoopbackNetwork::new();
    let server = KnitServer::new(Arc::new(network.clone()), Arc::new(TickHub::new()));
    let name = server.create_service(def).unwrap().name().to_owned();
    server.start(ServerOptions::default()).await.unwrap();
    let service = server.get_service(&name).unwrap();
    Fixture { network, service }
}

/// Client end of `member` recording everything the server sends.
fn listen(client: &LoopbackClient, member: &str, delivery: Delivery) -> Arc<Mutex<Vec<Args>>> {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    client
        .open_signal(ChannelKey::new("Game", member), delivery)
        .unwrap()
        .on_receive(Arc::new(move |args| sink.lock().push(args)));
    received
}

fn one(value: i64) -> Args {
    vec![Value::from(value)]
}

#[tokio::test]
async fn fire_variants_target_the_right_peers() {
    let fixture = start(ServiceDef::new("Game").signal("Announce")).await;
    let clients: Vec<LoopbackClient> = (0..3).map(|_| fixture.network.connect()).collect();
    let inboxes: Vec<_> = clients.iter().map(|c| listen(c, "Announce", Delivery::Reliable)).collect();
    let peers: Vec<PeerId> = clients.iter().map(LoopbackClient::peer).collect();
    let signal = fixture.service.signal("Announce").unwrap();

    signal.fire(peers[0], one(1)).unwrap();
    signal.fire_all(&one(2)).unwrap();
    signal.fire_except(peers[1], &one(3)).unwrap();
    signal.fire_filter(&one(4), |peer| peer == peers[2]).unwrap();
    signal.fire_for(&[peers[0], peers[1]], &one(5)).unwrap();

    assert_eq!(*inboxes[0].lock(), [one(1), one(2), one(3), one(5)]);
    assert_eq!(*inboxes[1].lock(), [one(2), one(5)]);
    assert_eq!(*inboxes[2].lock(), [one(2), one(3), one(4)]);
}

#[tokio::test]
async fn client_fire_reaches_listeners_until_disconnected() {
    let fixture = start(ServiceDef::new("Game").signal("Shout")).await;
    let client = fixture.network.connect();
    let wire = client.open_signal(ChannelKey::new("Game", "Shout"), Delivery::Reliable).unwrap();
    let signal = fixture.service.signal("Shout").unwrap();

    let heard = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&heard);
    let id = signal.connect(move |peer, args| sink.lock().push((peer, args)));

    wire.send(one(1)).unwrap();
    assert!(signal.disconnect(id));
    wire.send(one(2)).unwrap();

    assert_eq!(*heard.lock(), [(client.peer(), one(1))]);
    assert_eq!(signal.listener_count(), 0);
}

#[tokio::test]
async fn inbound_middleware_can_drop_client_messages() {
    let only_numbers = MiddlewareSet::new().inbound(|_: &CallContext<'_>, args: &mut Args| {
        if args.iter().all(Value::is_integer) { Flow::Continue } else { Flow::Halt(Vec::new()) }
    });
    let fixture = start(ServiceDef::new("Game").signal("Input").middleware(only_numbers)).await;
    let client = fixture.network.connect();
    let wire = client.open_signal(ChannelKey::new("Game", "Input"), Delivery::Reliable).unwrap();

    let heard = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&heard);
    fixture.service.signal("Input").unwrap().connect(move |_, args| sink.lock().push(args));

    wire.send(vec![Value::from("cheat")]).unwrap();
    wire.send(one(7)).unwrap();

    assert_eq!(*heard.lock(), [one(7)]);
}

#[tokio::test]
async fn outbound_middleware_runs_per_peer() {
    let stamp_peer = MiddlewareSet::new().outbound(|ctx: &CallContext<'_>, args: &mut Args| {
        args.push(Value::from(ctx.peer.unwrap_or_default()));
        Flow::Continue
    });
    let fixture = start(ServiceDef::new("Game").signal("Hello").middleware(stamp_peer)).await;
    let a = fixture.network.connect();
    let b = fixture.network.connect();
    let inbox_a = listen(&a, "Hello", Delivery::Reliable);
    let inbox_b = listen(&b, "Hello", Delivery::Reliable);

    fixture.service.signal("Hello").unwrap().fire_all(&Vec::new()).unwrap();

    assert_eq!(*inbox_a.lock(), [vec![Value::from(a.peer())]]);
    assert_eq!(*inbox_b.lock(), [vec![Value::from(b.peer())]]);
}

#[tokio::test]
async fn property_overrides_are_per_peer() {
    let fixture = start(ServiceDef::new("Game").property("Score", 0)).await;
    let a = fixture.network.connect();
    let b = fixture.network.connect();
    let inbox_a = listen(&a, "Score", Delivery::Reliable);
    let inbox_b = listen(&b, "Score", Delivery::Reliable);
    let score = fixture.service.property("Score").unwrap();

    score.set_for(a.peer(), Value::from(10)).unwrap();
    assert_eq!(score.get_for(a.peer()), Value::from(10));
    assert_eq!(score.get_for(b.peer()), Value::from(0));

    // `a` keeps its override, so only `b` hears the new top value.
    score.set_top(Value::from(5)).unwrap();
    assert_eq!(*inbox_a.lock(), [one(10)]);
    assert_eq!(*inbox_b.lock(), [one(5)]);

    score.clear_for(a.peer()).unwrap();
    assert_eq!(score.get_for(a.peer()), Value::from(5));
    assert_eq!(*inbox_a.lock(), [one(10), one(5)]);

    // Clearing a peer without an override pushes nothing.
    score.clear_for(b.peer()).unwrap();
    assert_eq!(inbox_b.lock().len(), 1);
}

#[tokio::test]
async fn property_set_drops_every_override() {
    let fixture = start(ServiceDef::new("Game").property("Mode", "lobby")).await;
    let clients: Vec<LoopbackClient> = (0..3).map(|_| fixture.network.connect()).collect();
    let peers: Vec<PeerId> = clients.iter().map(LoopbackClient::peer).collect();
    let mode = fixture.service.property("Mode").unwrap();

    mode.set_for_list(&peers[..2], Value::from("spectate")).unwrap();
    mode.set_filter(|peer| peer == peers[2], Value::from("play")).unwrap();
    assert_eq!(mode.get_for(peers[2]), Value::from("play"));

    mode.clear_filter(|peer| peer != peers[0]).unwrap();
    assert_eq!(mode.get_for(peers[0]), Value::from("spectate"));
    assert_eq!(mode.get_for(peers[1]), Value::from("lobby"));

    mode.set(Value::from("round")).unwrap();
    for peer in &peers {
        assert_eq!(mode.get_for(*peer), Value::from("round"));
    }
    assert_eq!(mode.get(), Value::from("round"));
}

#[tokio::test]
async fn property_fetch_returns_peer_view() {
    let fixture = start(ServiceDef::new("Game").property("Team", "none")).await;
    let a = fixture.network.connect();
    let b = fixture.network.connect();
    fixture.service.property("Team").unwrap().set_for(a.peer(), Value::from("red")).unwrap();

    let key = ChannelKey::new("Game", "Team");
    assert_eq!(a.request(&key, Vec::new()).await.unwrap(), vec![Value::from("red")]);
    assert_eq!(b.request(&key, Vec::new()).await.unwrap(), vec![Value::from("none")]);
}

#[tokio::test]
async fn departed_peer_does_not_stop_fan_out() {
    let fixture = start(ServiceDef::new("Game").property("Score", 0).signal("Announce")).await;
    let a = fixture.network.connect();
    let b = fixture.network.connect();
    let scores = listen(&a, "Score", Delivery::Reliable);
    let announcements = listen(&a, "Announce", Delivery::Reliable);
    b.disconnect();

    let score = fixture.service.property("Score").unwrap();
    let result = score.set_for_list(&[b.peer(), a.peer()], Value::from(7));
    assert!(matches!(
        result,
        Err(KnitError::PartialDelivery { undelivered, .. }) if undelivered == [b.peer()]
    ));
    assert_eq!(*scores.lock(), [one(7)]);
    assert_eq!(score.get_for(a.peer()), Value::from(7));
    assert_eq!(score.get_for(b.peer()), Value::from(0));

    let signal = fixture.service.signal("Announce").unwrap();
    let result = signal.fire_for(&[b.peer(), a.peer()], &one(1));
    assert!(matches!(
        result,
        Err(KnitError::PartialDelivery { undelivered, .. }) if undelivered == [b.peer()]
    ));
    assert_eq!(*announcements.lock(), [one(1)]);
}

#[tokio::test]
async fn overrides_of_departed_peers_are_pruned() {
    let fixture = start(ServiceDef::new("Game").property("Score", 0)).await;
    let a = fixture.network.connect();
    let b = fixture.network.connect();
    let score = fixture.service.property("Score").unwrap();

    score.set_for_list(&[a.peer(), b.peer()], Value::from(3)).unwrap();
    assert_eq!(score.override_count(), 2);

    b.disconnect();
    score.set_top(Value::from(1)).unwrap();
    assert_eq!(score.override_count(), 1);

    for _ in 0..5 {
        let churn = fixture.network.connect();
        score.set_for(churn.peer(), Value::from(9)).unwrap();
        churn.disconnect();
    }
    assert_eq!(score.override_count(), 2);

    score.clear_filter(|_| true).unwrap();
    assert_eq!(score.override_count(), 0);
    assert_eq!(score.get_for(a.peer()), Value::from(1));
}

#[tokio::test]
async fn unreliable_signal_drops_under_loss_while_reliable_does_not() {
    let network = LoopbackNetwork::with_unreliable_loss(0.5, 42);
    let server = KnitServer::new(Arc::new(network.clone()), Arc::new(TickHub::new()));
    server
        .create_service(ServiceDef::new("Game").signal("Chat").unreliable_signal("Position"))
        .unwrap();
    server.start(ServerOptions::default()).await.unwrap();
    let service = server.get_service("Game").unwrap();

    let client = network.connect();
    let chat = listen(&client, "Chat", Delivery::Reliable);
    let position = listen(&client, "Position", Delivery::Unreliable);

    for i in 0..200 {
        service.signal("Chat").unwrap().fire(client.peer(), one(i)).unwrap();
        service.signal("Position").unwrap().fire(client.peer(), one(i)).unwrap();
    }

    let chat: Vec<Args> = chat.lock().clone();
    assert_eq!(chat, (0..200).map(one).collect::<Vec<_>>());
    let delivered = position.lock().len();
    assert!(delivered > 0 && delivered < 200, "delivered {delivered} of 200");
    assert_eq!(network.stats().dropped, 200 - delivered as u64);
}

#[derive(Debug, Clone)]
enum PropertyOp {
    Set(i64),
    SetTop(i64),
    SetFor(usize, i64),
    ClearFor(usize),
}

fn property_op() -> impl proptest::strategy::Strategy<Value = PropertyOp> {
    use proptest::prelude::*;
    prop_oneof![
        (0i64..100).prop_map(PropertyOp::Set),
        (0i64..100).prop_map(PropertyOp::SetTop),
        (0usize..3, 0i64..100).prop_map(|(peer, value)| PropertyOp::SetFor(peer, value)),
        (0usize..3).prop_map(PropertyOp::ClearFor),
    ]
}

proptest::proptest! {
    #[test]
    fn prop_property_view_matches_model(ops in proptest::collection::vec(property_op(), 1..40)) {
        let fixture = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(start(ServiceDef::new("Game").property("Score", 0)));
        let peers: Vec<PeerId> = (0..3).map(|_| fixture.network.connect().peer()).collect();
        let score = fixture.service.property("Score").unwrap();

        let mut top = 0;
        let mut overrides = std::collections::HashMap::new();
        for op in ops {
            match op {
                PropertyOp::Set(v) => {
                    score.set(Value::from(v)).unwrap();
                    top = v;
                    overrides.clear();
                },
                PropertyOp::SetTop(v) => {
                    score.set_top(Value::from(v)).unwrap();
                    top = v;
                },
                PropertyOp::SetFor(i, v) => {
                    score.set_for(peers[i], Value::from(v)).unwrap();
                    overrides.insert(i, v);
                },
                PropertyOp::ClearFor(i) => {
                    score.clear_for(peers[i]).unwrap();
                    overrides.remove(&i);
                },
            }

            // PROPERTY: each peer sees its override, else the top value
            for (i, peer) in peers.iter().enumerate() {
                let expected = overrides.get(&i).copied().unwrap_or(top);
                proptest::prop_assert_eq!(score.get_for(*peer), Value::from(expected));
            }
            proptest::prop_assert_eq!(score.get(), Value::from(top));
        }
    }
}
