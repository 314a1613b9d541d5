//! End-to-end tests through the warp filter: auth at upgrade, presence,
//! direct messages, feed relay, history and avatar upload.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use socialx_realtime::auth::{Claims, Identity, JwtVerifier};
use socialx_realtime::config::HubSettings;
use socialx_realtime::media::MediaStore;
use socialx_realtime::messages::ServerMessage;
use socialx_realtime::routes::routes;
use socialx_realtime::server::Server;
use socialx_realtime::state::AppState;
use socialx_realtime::store::{MemoryStore, Store};
use warp::http::StatusCode;
use warp::test::WsClient;

const SECRET: &[u8] = b"test-secret";

fn token(id: &str) -> String {
    let claims = Claims {
        id: id.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

struct TestApp {
    state: AppState,
    store: Arc<MemoryStore>,
    _uploads: tempfile::TempDir,
}

async fn test_app() -> TestApp {
    let uploads = tempfile::tempdir().expect("Failed to create temp dir");
    let store = Arc::new(MemoryStore::new());
    let settings = HubSettings {
        ping_interval: None,
        persist_backoff: Duration::from_millis(1),
        ..HubSettings::default()
    };
    let state = AppState {
        server: Server::new(store.clone(), &settings),
        store: store.clone(),
        verifier: Arc::new(JwtVerifier::new(SECRET)),
        media: Arc::new(MediaStore::open(uploads.path(), 1024).await.unwrap()),
        max_upload_bytes: 1024,
    };
    TestApp {
        state,
        store,
        _uploads: uploads,
    }
}

async fn connect(app: &TestApp, id: &str) -> WsClient {
    warp::test::ws()
        .path(&format!("/ws?token={}", token(id)))
        .handshake(routes(app.state.clone(), &[]))
        .await
        .expect("handshake")
}

async fn next(client: &mut WsClient) -> ServerMessage {
    let frame = tokio::time::timeout(Duration::from_secs(2), client.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("connection closed");
    serde_json::from_str(frame.to_str().expect("text frame")).expect("server message")
}

async fn nothing_pending(client: &mut WsClient) {
    let pending = tokio::time::timeout(Duration::from_millis(100), client.recv()).await;
    assert!(pending.is_err(), "unexpected frame: {:?}", pending);
}

#[tokio::test]
async fn connect_without_credential_is_refused() {
    let app = test_app().await;
    let filter = routes(app.state.clone(), &[]);

    assert!(warp::test::ws().path("/ws").handshake(filter.clone()).await.is_err());
    assert!(warp::test::ws()
        .path("/ws?token=garbage")
        .handshake(filter)
        .await
        .is_err());
    assert!(app.state.server.registry().is_empty().await);
}

#[tokio::test]
async fn two_clients_chat_then_one_leaves() {
    let app = test_app().await;
    let x = Identity::from("x");
    let y = Identity::from("y");

    let mut client_x = connect(&app, "x").await;
    assert_eq!(
        next(&mut client_x).await,
        ServerMessage::PresenceSnapshot { identities: vec![] }
    );

    let mut client_y = connect(&app, "y").await;
    assert_eq!(
        next(&mut client_y).await,
        ServerMessage::PresenceSnapshot {
            identities: vec![x.clone()]
        }
    );
    assert_eq!(
        next(&mut client_x).await,
        ServerMessage::PresenceOnline { identity: y.clone() }
    );

    client_x
        .send_text(r#"{"type":"send-message","to":"y","text":"hi"}"#)
        .await;
    let received = next(&mut client_y).await;
    let echoed = next(&mut client_x).await;
    assert_eq!(received, echoed);
    let ServerMessage::NewMessage { message } = received else {
        panic!("expected new-message");
    };
    assert_eq!(message.from, x);
    assert_eq!(message.text, "hi");

    drop(client_y);
    let ServerMessage::PresenceOffline { identity, .. } = next(&mut client_x).await else {
        panic!("expected presence-offline");
    };
    assert_eq!(identity, y);

    client_x
        .send_text(r#"{"type":"send-message","to":"y","text":"gone"}"#)
        .await;
    let ServerMessage::NewMessage { message } = next(&mut client_x).await else {
        panic!("expected echo");
    };
    assert_eq!(message.text, "gone");
    nothing_pending(&mut client_x).await;

    let history = app.store.conversation(&x, &y).await.unwrap();
    assert_eq!(
        history.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(),
        vec!["hi", "gone"]
    );
    assert!(!app.store.user(&y).await.unwrap().unwrap().online);
}

#[tokio::test]
async fn feed_events_follow_per_kind_scope() {
    let app = test_app().await;
    let mut client_a = connect(&app, "a").await;
    next(&mut client_a).await;
    let mut client_b = connect(&app, "b").await;
    next(&mut client_b).await;
    next(&mut client_a).await;

    client_a
        .send_text(
            r#"{"type":"new-post","post":{"id":"p1","text":"first","user":{"id":"a","name":"A"},"created_at":"2024-05-01T10:00:00Z"}}"#,
        )
        .await;
    assert!(matches!(next(&mut client_b).await, ServerMessage::NewPost { post } if post.id == "p1"));

    client_a
        .send_text(r#"{"type":"like-toggled","post_id":"p1","likes":["a"]}"#)
        .await;
    assert!(matches!(next(&mut client_a).await, ServerMessage::LikeUpdate { .. }));
    assert!(matches!(next(&mut client_b).await, ServerMessage::LikeUpdate { .. }));

    // Unknown shapes are dropped without a reply.
    client_a.send_text(r#"{"type":"like-toggled"}"#).await;
    client_a.send_text("not json").await;
    nothing_pending(&mut client_a).await;
    nothing_pending(&mut client_b).await;
}

#[tokio::test]
async fn history_endpoint_requires_auth_and_returns_conversation() {
    let app = test_app().await;
    let mut client_x = connect(&app, "x").await;
    next(&mut client_x).await;
    client_x
        .send_text(r#"{"type":"send-message","to":"y","text":"while you were out"}"#)
        .await;
    next(&mut client_x).await;

    let filter = routes(app.state.clone(), &[]);
    let resp = warp::test::request()
        .path("/api/messages/x")
        .reply(&filter)
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = warp::test::request()
        .path("/api/messages/x")
        .header("authorization", format!("Bearer {}", token("y")))
        .reply(&filter)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["messages"][0]["text"], "while you were out");
    assert_eq!(body["messages"][0]["seen"], false);

    let resp = warp::test::request()
        .path("/api/presence")
        .header("authorization", format!("Bearer {}", token("y")))
        .reply(&filter)
        .await;
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["online"], serde_json::json!(["x"]));
}

#[tokio::test]
async fn avatar_upload_is_stored_and_served() {
    let app = test_app().await;
    let filter = routes(app.state.clone(), &[]);
    let image = b"\x89PNG\r\n\x1a\nfake".to_vec();

    let resp = warp::test::request()
        .method("POST")
        .path("/api/upload/avatar")
        .header("authorization", format!("Bearer {}", token("alice")))
        .header("content-type", "image/png")
        .body(image.clone())
        .reply(&filter)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    let avatar = body["avatar"].as_str().unwrap().to_string();
    assert!(avatar.starts_with("/uploads/"));

    let record = app.store.user(&Identity::from("alice")).await.unwrap().unwrap();
    assert_eq!(record.avatar.as_deref(), Some(avatar.as_str()));

    let resp = warp::test::request().path(&avatar).reply(&filter).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.body().as_ref(), image.as_slice());

    let resp = warp::test::request()
        .method("POST")
        .path("/api/upload/avatar")
        .header("authorization", format!("Bearer {}", token("alice")))
        .header("content-type", "text/plain")
        .body("hello")
        .reply(&filter)
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = warp::test::request()
        .method("POST")
        .path("/api/upload/avatar")
        .header("authorization", format!("Bearer {}", token("alice")))
        .header("content-type", "image/png")
        .body(vec![0u8; 4096])
        .reply(&filter)
        .await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn typing_over_a_real_socket() {
    use tokio_tungstenite::tungstenite::Message;

    let app = test_app().await;
    let (addr, serve) = warp::serve(routes(app.state.clone(), &[])).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(serve);

    let (mut alice, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws?token={}", addr, token("alice")))
        .await
        .expect("alice connects");
    let snapshot = alice.next().await.unwrap().unwrap();
    assert!(snapshot.to_text().unwrap().contains("presence-snapshot"));

    let (mut bob, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws?token={}", addr, token("bob")))
        .await
        .expect("bob connects");
    bob.next().await.unwrap().unwrap();
    let online = alice.next().await.unwrap().unwrap();
    assert!(online.to_text().unwrap().contains("presence-online"));

    bob.send(Message::Text("{\"type\":\"bogus\"}".into())).await.unwrap();
    bob.send(Message::Text(r#"{"type":"typing-start","to":"alice"}"#.into()))
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(2), alice.next())
        .await
        .expect("typing relayed")
        .unwrap()
        .unwrap();
    let message: ServerMessage = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(
        message,
        ServerMessage::TypingStart {
            from: Identity::from("bob")
        }
    );
}

#[tokio::test]
async fn cors_preflight_honours_origin_list() {
    let app = test_app().await;
    let filter = routes(app.state.clone(), &["http://localhost:5173".to_string()]);

    let resp = warp::test::request()
        .method("OPTIONS")
        .path("/api/presence")
        .header("origin", "http://evil.example")
        .header("access-control-request-method", "GET")
        .reply(&filter)
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(resp.headers().get("access-control-allow-origin").is_none());

    let resp = warp::test::request()
        .method("OPTIONS")
        .path("/api/presence")
        .header("origin", "http://localhost:5173")
        .header("access-control-request-method", "GET")
        .reply(&filter)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "http://localhost:5173"
    );
}
