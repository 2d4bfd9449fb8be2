//! Shared fixtures for integration tests: a stub bootstrap endpoint and an
//! invitation URL builder.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use url::Url;

/// What the stub endpoint answers for one key.
#[derive(Clone)]
pub enum Reply {
    Value(String),
    Status(StatusCode),
    Body(&'static str),
    Slow(Duration, String),
}

async fn lookup(
    State(replies): State<Arc<HashMap<String, Reply>>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(key) = params.get("key") else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    match replies.get(key).cloned() {
        Some(Reply::Value(value)) => axum::Json(serde_json::json!({ "value": value })).into_response(),
        Some(Reply::Status(status)) => status.into_response(),
        Some(Reply::Body(body)) => body.into_response(),
        Some(Reply::Slow(delay, value)) => {
            tokio::time::sleep(delay).await;
            axum::Json(serde_json::json!({ "value": value })).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Serve `GET /url?key=` on an ephemeral loopback port; returns the base URL.
pub async fn serve(replies: impl IntoIterator<Item = (&'static str, Reply)>) -> Url {
    let replies: HashMap<String, Reply> =
        replies.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    let router = Router::new().route("/url", get(lookup)).with_state(Arc::new(replies));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Url::parse(&format!("http://{addr}/")).unwrap()
}

/// Out-of-band invitation URL; `handshake` adds a DID exchange protocol.
pub fn invitation_url(id: &str, label: Option<&str>, handshake: bool) -> String {
    let mut body = serde_json::json!({
        "@type": "https://didcomm.org/out-of-band/1.1/invitation",
        "@id": id,
        "services": [{
            "id": "#inline",
            "type": "did-communication",
            "recipientKeys": ["did:key:z6MkpTHR8VNsBxYAAWHut2Geadd9jSwuBV8xRoAnwWsdvktH"],
            "serviceEndpoint": "https://mediator.example"
        }],
    });
    if let Some(label) = label {
        body["label"] = serde_json::Value::from(label);
    }
    if handshake {
        body["handshake_protocols"] = serde_json::json!(["https://didcomm.org/didexchange/1.0"]);
    }
    format!("https://mediator.example/oob?_oob={}", URL_SAFE_NO_PAD.encode(body.to_string()))
}
