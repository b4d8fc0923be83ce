use axum::extract::{Path, State};
use axum::http::StatusCode;
use colabri_presence::config::Config;
use colabri_presence::handlers::{diagnostics, doc_presence};
use colabri_presence::models::{ClientMessage, PublishMessage, ServerMessage};
use colabri_presence::presence::awareness::WsAwareness;
use colabri_presence::presence::{
    AwarenessChannel, ColorToken, ConnectionStatus, CursorRange, PeerRecord, PeerUser, SlotChange,
    UserProfile,
};
use colabri_presence::routes::create_app;
use colabri_presence::AppState;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_relay() -> (SocketAddr, Arc<AppState>) {
    let config = Config::default();
    let state = Arc::new(AppState::new(&config));
    let app = create_app(state.clone(), &config);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

/// A relay on its own runtime. Stopping it drops the runtime and with it
/// every open connection, like a process restart would.
struct IsolatedRelay {
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: oneshot::Sender<()>,
    thread: JoinHandle<()>,
}

impl IsolatedRelay {
    fn start(addr: SocketAddr) -> Self {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (shutdown, stop) = oneshot::channel::<()>();
        let thread = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let listener = bind_retrying(addr).await;
                let config = Config::default();
                let state = Arc::new(AppState::new(&config));
                let app = create_app(state.clone(), &config);
                ready_tx.send((listener.local_addr().unwrap(), state)).unwrap();
                let server = tokio::spawn(async move { axum::serve(listener, app).await });
                let _ = stop.await;
                server.abort();
            });
        });
        let (addr, state) = ready_rx.recv().unwrap();
        Self { addr, state, shutdown, thread }
    }

    fn stop(self) {
        let _ = self.shutdown.send(());
        self.thread.join().unwrap();
    }
}

async fn bind_retrying(addr: SocketAddr) -> TcpListener {
    for _ in 0..100 {
        if let Ok(listener) = TcpListener::bind(addr).await {
            return listener;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("could not bind {}", addr);
}

fn record(name: &str, cursor: Option<CursorRange>) -> PeerRecord {
    PeerRecord {
        user: Some(PeerUser {
            id: name.to_lowercase(),
            name: name.to_string(),
            color: ColorToken::new("#4B2995"),
        }),
        cursor,
        marker: None,
    }
}

async fn connect(addr: SocketAddr, doc_id: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/ws/{}", addr, doc_id)).await.unwrap();
    ws
}

async fn send(ws: &mut Client, message: &ClientMessage) {
    let text = serde_json::to_string(message).unwrap();
    ws.send(Message::Text(text.into())).await.unwrap();
}

async fn next_message(ws: &mut Client) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("relay went quiet")
            .expect("relay closed the connection")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn relay_fans_out_records_between_raw_clients() {
    let (addr, _state) = spawn_relay().await;

    let mut a = connect(addr, "doc-1").await;
    let ServerMessage::Welcome(welcome) = next_message(&mut a).await else {
        panic!("expected welcome");
    };
    let a_slot = welcome.slot;
    assert!(welcome.states.is_empty());

    let alice = record("Alice", Some(CursorRange::new(3, 7)));
    send(&mut a, &ClientMessage::Publish(PublishMessage { record: alice.clone() })).await;

    // B's welcome carries A's record once the relay has applied it
    let mut b = loop {
        let mut b = connect(addr, "doc-1").await;
        let ServerMessage::Welcome(welcome) = next_message(&mut b).await else {
            panic!("expected welcome");
        };
        if !welcome.states.is_empty() {
            assert_eq!(welcome.states[0].slot, a_slot);
            assert_eq!(welcome.states[0].record, alice);
            break b;
        }
    };

    let bob = record("Bob", None);
    send(&mut b, &ClientMessage::Publish(PublishMessage { record: bob.clone() })).await;
    let b_slot = loop {
        if let ServerMessage::State(state) = next_message(&mut a).await {
            if state.record.as_ref() == Some(&bob) {
                break state.slot;
            }
        }
    };
    assert_ne!(a_slot, b_slot);

    send(&mut a, &ClientMessage::Ping).await;
    loop {
        match next_message(&mut a).await {
            ServerMessage::Pong(pong) => {
                assert!(chrono::DateTime::parse_from_rfc3339(&pong.date).is_ok());
                break;
            }
            // Own writes are never echoed back
            ServerMessage::State(state) => assert_ne!(state.slot, a_slot),
            ServerMessage::Welcome(_) => panic!("unexpected welcome"),
        }
    }

    b.close(None).await.unwrap();
    loop {
        if let ServerMessage::State(state) = next_message(&mut a).await {
            if state.slot == b_slot && state.record.is_none() {
                break;
            }
        }
    }
}

#[tokio::test]
async fn ws_awareness_resolves_duplicate_identity_through_the_relay() {
    let (addr, state) = spawn_relay().await;
    let url = format!("ws://{}/ws/doc-2", addr);

    let a = WsAwareness::connect(&url, Duration::from_millis(100)).await.unwrap();
    assert!(a.is_connected());
    let alice = colabri_presence::presence::identity::resolve_identity(
        &UserProfile {
            name: Some("Alice".into()),
            id: Some("alice".into()),
            email: None,
        },
        std::iter::empty(),
    );
    a.publish(PeerRecord {
        user: Some(alice.as_peer_user()),
        ..Default::default()
    });

    let room = state.rooms.get("doc-2").await.unwrap();
    eventually(|| room.slot_count() == 1).await;

    let b = WsAwareness::connect(&url, Duration::from_millis(100)).await.unwrap();
    assert_ne!(a.local_slot(), b.local_slot());
    let seen_by_b = b.states();
    let peers = seen_by_b.values();
    let (name, id) = colabri_presence::presence::resolve("Alice", "alice", peers);
    assert_eq!((name.as_str(), id.as_str()), ("Alice-2", "alice-2"));

    b.publish(record("Alice-2", Some(CursorRange::caret(1))));
    eventually(|| a.states().contains_key(&b.local_slot())).await;

    b.clear();
    eventually(|| !a.states().contains_key(&b.local_slot())).await;
    b.ping().unwrap();
}

#[tokio::test]
async fn presence_endpoint_lists_room_records() {
    let (addr, state) = spawn_relay().await;

    let missing = doc_presence(State(state.clone()), Path("doc-3".to_string())).await;
    let Err((status, _)) = missing else {
        panic!("expected 404");
    };
    assert_eq!(status, StatusCode::NOT_FOUND);

    let mut a = connect(addr, "doc-3").await;
    next_message(&mut a).await;
    send(&mut a, &ClientMessage::Publish(PublishMessage { record: record("Alice", None) })).await;
    let room = state.rooms.get("doc-3").await.unwrap();
    eventually(|| room.slot_count() == 1).await;

    let Ok((status, body)) = doc_presence(State(state.clone()), Path("doc-3".to_string())).await else {
        panic!("expected presence");
    };
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.0.n_conn, 1);
    assert_eq!(body.0.states.len(), 1);
    assert_eq!(body.0.states[0].record.display_name(), Some("Alice"));

    let (_, stats) = diagnostics(State(state)).await;
    assert_eq!(stats.0.n_rooms, 1);
    assert_eq!(stats.0.n_records, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ws_awareness_recovers_after_the_relay_restarts() {
    let relay = IsolatedRelay::start("127.0.0.1:0".parse().unwrap());
    let addr = relay.addr;
    let url = format!("ws://{}/ws/doc-4", addr);

    // B takes the first slot, so A lands on a different one after the restart
    let mut b = connect(addr, "doc-4").await;
    let ServerMessage::Welcome(welcome) = next_message(&mut b).await else {
        panic!("expected welcome");
    };
    let b_slot = welcome.slot;

    let a = WsAwareness::connect(&url, Duration::from_millis(50)).await.unwrap();
    let old_slot = a.local_slot();
    assert_ne!(old_slot, b_slot);
    let mut events = a.subscribe();
    let seen_status = Arc::new(Mutex::new(Vec::new()));
    {
        let mut status = a.status();
        let seen_status = seen_status.clone();
        tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let current = *status.borrow_and_update();
                seen_status.lock().unwrap().push(current);
            }
        });
    }

    let alice = record("Alice", Some(CursorRange::caret(2)));
    a.publish(alice.clone());
    send(&mut b, &ClientMessage::Publish(PublishMessage { record: record("Bob", None) })).await;
    eventually(|| a.states().contains_key(&b_slot)).await;

    relay.stop();

    let removed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if event.changes.contains(&SlotChange::Removed(b_slot)) {
                break;
            }
        }
    })
    .await;
    assert!(removed.is_ok(), "B's slot was never reported removed");
    assert!(!a.states().contains_key(&b_slot));
    eventually(|| !a.is_connected()).await;
    eventually(|| seen_status.lock().unwrap().contains(&ConnectionStatus::Disconnected)).await;
    // The local record is kept while offline
    assert_eq!(a.local_state(), Some(alice.clone()));

    let relay = IsolatedRelay::start(addr);
    eventually(|| a.is_connected()).await;
    let new_slot = a.local_slot();
    assert_ne!(new_slot, old_slot);

    let room = relay.state.rooms.get("doc-4").await.unwrap();
    eventually(|| room.states().get(&new_slot) == Some(&alice)).await;
    assert_eq!(room.slot_count(), 1);
    eventually(|| seen_status.lock().unwrap().last() == Some(&ConnectionStatus::Connected)).await;

    drop(a);
    relay.stop();
}
