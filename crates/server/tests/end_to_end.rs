//! The client library against a live server on a loopback port.

use std::net::SocketAddr;
use std::time::Duration;

use chat_client::{
    AuthSession, ClientConfig, ConnectionState, GateOutcome, Route, SessionGate, Storage,
    Transport, TransportConfig, ViewUpdate,
};
use chat_server::{app, AppState, ServerConfig};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn spawn_server() -> SocketAddr {
    let config = ServerConfig::default();
    let router = app(AppState::new(&config), config.cors());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn client_config(addr: SocketAddr) -> ClientConfig {
    ClientConfig::default()
        .with_api_url(format!("http://{addr}/api"))
        .with_ws_url(format!("ws://{addr}/ws"))
        .with_handshake_delay(Duration::from_millis(20))
}

fn gate(config: &ClientConfig, session: AuthSession) -> SessionGate {
    SessionGate::new(session, Transport::new(TransportConfig::from(config)))
}

async fn next(view: &mut chat_client::ChatView) -> ViewUpdate {
    timeout(WAIT, view.next_update())
        .await
        .expect("update in time")
        .expect("view still open")
}

async fn enter_authenticated(gate: &SessionGate) -> chat_client::ChatView {
    let mut view = match gate.enter().await {
        GateOutcome::Entered(view) => view,
        other => panic!("expected chat view, got {other:?}"),
    };
    assert_eq!(view.error(), None);
    match next(&mut view).await {
        ViewUpdate::Authenticated(_) => {}
        other => panic!("expected authentication, got {other:?}"),
    }
    assert_eq!(view.status(), ConnectionState::Authenticated);
    view
}

#[tokio::test]
async fn send_is_confirmed_and_fanned_out() {
    let addr = spawn_server().await;
    let config = client_config(addr);

    let alice = AuthSession::restore(&config, Storage::memory());
    alice
        .register("alice", "alice@example.com", "secret1")
        .await
        .unwrap();
    let bob = AuthSession::restore(&config, Storage::memory());
    bob.register("bob", "bob@example.com", "secret1")
        .await
        .unwrap();

    let alice_gate = gate(&config, alice);
    let bob_gate = gate(&config, bob);
    let mut alice_view = enter_authenticated(&alice_gate).await;
    let mut bob_view = enter_authenticated(&bob_gate).await;
    assert_eq!(alice_view.user().map(|u| u.username.as_str()), Some("alice"));

    alice_view.send("hello").unwrap();
    assert_eq!(alice_view.reconciler().pending_count(), 1);

    match next(&mut alice_view).await {
        ViewUpdate::MessageAppended(message) => {
            assert_eq!(message.id, 1);
            assert_eq!(message.content, "hello");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(alice_view.reconciler().pending_count(), 0);
    assert_eq!(alice_view.entries().len(), 1);

    match next(&mut bob_view).await {
        ViewUpdate::MessageAppended(message) => {
            assert_eq!(message.author.username, "alice");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(bob_view.entries().len(), 1);
}

#[tokio::test]
async fn send_refused_before_auth_does_not_linger() {
    let addr = spawn_server().await;
    let config = client_config(addr).with_handshake_delay(Duration::from_millis(300));

    let alice = AuthSession::restore(&config, Storage::memory());
    alice
        .register("alice", "alice@example.com", "secret1")
        .await
        .unwrap();
    let bob = AuthSession::restore(&config, Storage::memory());
    bob.register("bob", "bob@example.com", "secret1")
        .await
        .unwrap();

    let gate = gate(&config, alice);
    let mut view = match gate.enter().await {
        GateOutcome::Entered(view) => view,
        other => panic!("expected chat view, got {other:?}"),
    };
    let mut state = gate.transport().watch_state();
    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Connected))
        .await
        .expect("open in time")
        .unwrap();

    // goes out before the auth envelope
    view.send("early").unwrap();
    assert_eq!(view.reconciler().pending_count(), 1);

    assert_eq!(
        next(&mut view).await,
        ViewUpdate::Error("Not authenticated".into())
    );
    assert_eq!(view.reconciler().pending_count(), 0);
    assert!(view.entries().is_empty());
    assert!(matches!(next(&mut view).await, ViewUpdate::Authenticated(_)));

    bob.client().send_message("from bob").await.unwrap();
    assert!(matches!(next(&mut view).await, ViewUpdate::MessageAppended(_)));

    view.send("later").unwrap();
    match next(&mut view).await {
        ViewUpdate::MessageAppended(message) => assert_eq!(message.content, "later"),
        other => panic!("unexpected {other:?}"),
    }

    let entries: Vec<_> = view
        .entries()
        .iter()
        .map(|e| (e.message.content.as_str(), e.is_pending()))
        .collect();
    assert_eq!(entries, vec![("from bob", false), ("later", false)]);
}

#[tokio::test]
async fn rest_send_and_its_broadcast_do_not_duplicate() {
    let addr = spawn_server().await;
    let config = client_config(addr);

    let session = AuthSession::restore(&config, Storage::memory());
    session
        .register("alice", "alice@example.com", "secret1")
        .await
        .unwrap();
    let gate = gate(&config, session);
    let mut view = enter_authenticated(&gate).await;

    let sent = view.send_via_rest("over rest").await.unwrap();
    assert_eq!(view.entries().len(), 1);

    assert_eq!(next(&mut view).await, ViewUpdate::DuplicateIgnored(sent.id));
    assert_eq!(view.entries().len(), 1);
}

#[tokio::test]
async fn history_is_loaded_on_entry() {
    let addr = spawn_server().await;
    let config = client_config(addr);

    let session = AuthSession::restore(&config, Storage::memory());
    session
        .register("alice", "alice@example.com", "secret1")
        .await
        .unwrap();
    session.client().send_message("one").await.unwrap();
    session.client().send_message("two").await.unwrap();

    let gate = gate(&config, session);
    let view = enter_authenticated(&gate).await;
    let contents: Vec<_> = view
        .entries()
        .iter()
        .map(|e| e.message.content.as_str())
        .collect();
    assert_eq!(contents, vec!["one", "two"]);
}

#[tokio::test]
async fn rejected_credential_redirects_and_clears_session() {
    let addr = spawn_server().await;
    let config = client_config(addr);

    let session = AuthSession::restore(&config, Storage::memory());
    session.set_token("not-a-real-token");
    let gate = gate(&config, session.clone());

    match gate.enter().await {
        GateOutcome::Redirect(route) => assert_eq!(route, Route::Login),
        other => panic!("expected redirect, got {other:?}"),
    }
    assert!(!session.is_authenticated());
    assert_eq!(gate.transport().state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn missing_credential_redirects() {
    let addr = spawn_server().await;
    let config = client_config(addr);
    let gate = gate(&config, AuthSession::restore(&config, Storage::memory()));

    assert!(matches!(gate.enter().await, GateOutcome::Redirect(Route::Login)));
}

#[tokio::test]
async fn logout_tears_the_socket_down() {
    let addr = spawn_server().await;
    let config = client_config(addr);

    let session = AuthSession::restore(&config, Storage::memory());
    session
        .register("alice", "alice@example.com", "secret1")
        .await
        .unwrap();
    let gate = gate(&config, session.clone());
    let view = enter_authenticated(&gate).await;

    assert_eq!(view.logout(), Route::Login);
    assert!(!session.is_authenticated());
    assert_eq!(gate.transport().state(), ConnectionState::Disconnected);
    assert!(matches!(gate.enter().await, GateOutcome::Redirect(Route::Login)));
}
