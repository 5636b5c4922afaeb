//! In-process stand-in for the Telegram Bot API used by the unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use {
    axum::{Json, Router, body::Bytes, extract::State, http::Uri, routing::post},
    serde_json::{Value, json},
    tokio::sync::oneshot,
};

#[derive(Clone, Default)]
struct MockState {
    requests: Arc<Mutex<Vec<(String, Value)>>>,
    queued: Arc<Mutex<HashMap<String, VecDeque<Value>>>>,
    next_message_id: Arc<Mutex<i64>>,
}

pub struct MockTelegramApi {
    state: MockState,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<tokio::task::JoinHandle<()>>,
    pub bot: teloxide::Bot,
}

impl MockTelegramApi {
    pub async fn start() -> Self {
        let state = MockState::default();
        let app = Router::new()
            .route("/{*path}", post(handle))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("serve mock telegram api");
        });

        let api_url = reqwest::Url::parse(&format!("http://{addr}/")).expect("parse api url");
        Self {
            state,
            shutdown: Some(shutdown_tx),
            server: Some(server),
            bot: teloxide::Bot::new("test-token").set_api_url(api_url),
        }
    }

    /// Queue a raw response body for the next call of `method`.
    pub fn push_response(&self, method: &str, body: Value) {
        self.state
            .queued
            .lock()
            .unwrap()
            .entry(method.to_ascii_lowercase())
            .or_default()
            .push_back(body);
    }

    /// Queue one successful `getUpdates` batch.
    pub fn push_updates(&self, updates: Vec<Value>) {
        self.push_response("getUpdates", json!({ "ok": true, "result": updates }));
    }

    /// Bodies of every request made to `method`, oldest first.
    pub fn requests(&self, method: &str) -> Vec<Value> {
        let method = method.to_ascii_lowercase();
        self.state
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| *m == method)
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(server) = self.server.take() {
            server.await.expect("mock server task");
        }
    }
}

async fn handle(State(state): State<MockState>, uri: Uri, body: Bytes) -> Json<Value> {
    let method = uri
        .path()
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let parsed = serde_json::from_slice(&body).unwrap_or(Value::Null);
    state
        .requests
        .lock()
        .unwrap()
        .push((method.clone(), parsed.clone()));

    let queued = state
        .queued
        .lock()
        .unwrap()
        .get_mut(&method)
        .and_then(VecDeque::pop_front);
    if let Some(body) = queued {
        return Json(body);
    }

    match method.as_str() {
        "getupdates" => {
            // Stand in for a long poll that timed out empty.
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Json(json!({ "ok": true, "result": [] }))
        },
        "getme" => Json(json!({
            "ok": true,
            "result": {
                "id": 7,
                "is_bot": true,
                "first_name": "Switchboard",
                "username": "switchboard_bot",
                "can_join_groups": true,
                "can_read_all_group_messages": false,
                "supports_inline_queries": false,
                "can_connect_to_business": false,
                "has_main_web_app": false
            }
        })),
        "sendmessage" => {
            let message_id = {
                let mut next = state.next_message_id.lock().unwrap();
                *next += 1;
                *next
            };
            Json(json!({
                "ok": true,
                "result": {
                    "message_id": message_id,
                    "date": 0,
                    "chat": { "id": parsed["chat_id"], "type": "private", "first_name": "A" },
                    "text": parsed["text"]
                }
            }))
        },
        _ => Json(json!({ "ok": true, "result": true })),
    }
}

/// A private-chat text message update.
pub fn text_update(update_id: i64, message_id: i64, text: &str, username: Option<&str>) -> Value {
    json!({
        "update_id": update_id,
        "message": message_json(message_id, json!({ "text": text }), username)
    })
}

pub fn message_json(message_id: i64, content: Value, username: Option<&str>) -> Value {
    let mut from = json!({ "id": 1001, "is_bot": false, "first_name": "Alice" });
    if let Some(username) = username {
        from["username"] = json!(username);
    }
    let mut message = json!({
        "message_id": message_id,
        "date": 1,
        "chat": { "id": 42, "type": "private", "first_name": "Alice" },
        "from": from
    });
    if let (Some(target), Some(extra)) = (message.as_object_mut(), content.as_object()) {
        target.extend(extra.clone());
    }
    message
}
