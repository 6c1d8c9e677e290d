use axum::http::StatusCode;
use chat_relay::{
    api::{build_router, AppState},
    config::Config,
};
use chat_api::{StoredMessage, UserProfile, USER_HEADER};
use std::net::{SocketAddr, TcpListener};
use tokio::task::JoinHandle;

async fn spawn_server(config: Config) -> (SocketAddr, JoinHandle<()>, AppState) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();

    let config = Config {
        bind: addr.to_string(),
        ..config
    };
    let state = AppState::new(config);
    let app = build_router(state.clone());
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    (addr, server, state)
}

async fn send(
    client: &reqwest::Client,
    addr: SocketAddr,
    from: &str,
    to: &str,
    content: &str,
) -> reqwest::Response {
    client
        .post(format!("http://{}/api/users/messages/send", addr))
        .header(USER_HEADER, from)
        .json(&serde_json::json!({"senderId": from, "receiverId": to, "content": content}))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn message_flow_and_ordering() {
    let (addr, server, state) = spawn_server(Config::default()).await;
    let client = reqwest::Client::new();

    let resp = send(&client, addr, "alice", "bob", "hi bob").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let first: serde_json::Value = resp.json().await.unwrap();
    assert!(first["_id"].as_str().is_some_and(|id| !id.is_empty()));
    assert_eq!(first["senderId"], "alice");
    assert!(first["createdAt"].as_i64().is_some());

    send(&client, addr, "alice", "carol", "elsewhere").await;
    let resp = send(&client, addr, "bob", "alice", "hey alice").await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // either side sees both directions, oldest first
    for (me, peer) in [("alice", "bob"), ("bob", "alice")] {
        let history: Vec<StoredMessage> = client
            .get(format!("http://{}/api/users/messages/{}", addr, peer))
            .header(USER_HEADER, me)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi bob", "hey alice"]);
    }
    assert_eq!(state.log.len(), 3);
    server.abort();
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let (addr, server, state) = spawn_server(Config::default()).await;
    let client = reqwest::Client::new();
    let resp = send(&client, addr, "alice", "bob", "   ").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "empty_message");
    assert!(state.log.is_empty());
    server.abort();
}

#[tokio::test]
async fn caller_identity_is_required_and_checked() {
    let (addr, server, _state) = spawn_server(Config::default()).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{}/api/users/messages/bob", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = send(&client, addr, "mallory", "bob", "spoof").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let resp = client
        .post(format!("http://{}/api/users/messages/send", addr))
        .header(USER_HEADER, "mallory")
        .json(&serde_json::json!({"senderId": "alice", "receiverId": "bob", "content": "spoof"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = client
        .post(format!("http://{}/api/users/messages/send", addr))
        .json(&serde_json::json!({"senderId": "alice", "receiverId": "bob", "content": "anonymous"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    server.abort();
}

#[tokio::test]
async fn directory_excludes_caller() {
    let config = Config {
        users: vec![
            UserProfile {
                peer_id: "alice".into(),
                full_name: "Alice".into(),
                image_url: None,
            },
            UserProfile {
                peer_id: "bob".into(),
                full_name: "Bob".into(),
                image_url: Some("https://img/bob.png".into()),
            },
        ],
        ..Config::default()
    };
    let (addr, server, _state) = spawn_server(config).await;
    let client = reqwest::Client::new();
    let users: serde_json::Value = client
        .get(format!("http://{}/api/users", addr))
        .header(USER_HEADER, "alice")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let users = users.as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["clerkId"], "bob");
    assert_eq!(users[0]["fullName"], "Bob");
    assert_eq!(users[0]["imageUrl"], "https://img/bob.png");
    server.abort();
}
