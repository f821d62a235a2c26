#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use nearby_load_test::api::ApiClient;
use nearby_load_test::config::Config;
use nearby_load_test::http_behavior::HttpBehavior;
use nearby_load_test::metrics::{EventKind, MemorySink, MetricsSink};
use nearby_load_test::registry::UserRegistry;
use nearby_load_test::user::LoadTestState;
use nearby_protocol::{User, UserId, PATH_REGISTER};
use rand::{rngs::SmallRng, SeedableRng};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub fn user(id: i64) -> User {
    User {
        id: UserId(id),
        name: format!("User{}", id),
    }
}

pub fn api(server: &MockServer) -> ApiClient {
    ApiClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
}

pub fn http_behavior(
    server: &MockServer,
    registry: &Arc<UserRegistry>,
    sink: &Arc<MemorySink>,
    name: &str,
) -> HttpBehavior {
    let sink: Arc<dyn MetricsSink> = sink.clone();

    HttpBehavior::new(
        name.to_string(),
        api(server),
        registry.clone(),
        sink,
        SmallRng::seed_from_u64(0),
    )
}

pub fn test_config(http_server_url: &str, ws_server_url: &str) -> Config {
    let mut config = Config::default();

    config.http_server_url = http_server_url.to_string();
    config.ws_server_url = ws_server_url.to_string();
    config.think_time.min_ms = 0;
    config.think_time.max_ms = 1;

    config
}

pub fn load_test_state(config: Config, registry: &Arc<UserRegistry>, sink: &Arc<MemorySink>) -> LoadTestState {
    let api = ApiClient::new(&config.http_server_url, Duration::from_secs(5)).unwrap();

    LoadTestState {
        config: Arc::new(config),
        api,
        registry: registry.clone(),
        sink: sink.clone(),
    }
}

/// Registration answers 201 with the given user exactly once
pub async fn mount_register_once(server: &MockServer, registered: User) {
    Mock::given(method("POST"))
        .and(path(PATH_REGISTER))
        .respond_with(ResponseTemplate::new(201).set_body_json(registered))
        .up_to_n_times(1)
        .expect(1)
        .mount(server)
        .await;
}

/// Registration answers 201 with a fresh id for every request
pub async fn mount_register_counting(server: &MockServer) {
    let next_id = AtomicI64::new(1);

    Mock::given(method("POST"))
        .and(path(PATH_REGISTER))
        .respond_with(move |request: &Request| {
            let body: ::serde_json::Value = request.body_json().unwrap();

            ResponseTemplate::new(201).set_body_json(::serde_json::json!({
                "id": next_id.fetch_add(1, Ordering::SeqCst),
                "name": body["name"],
            }))
        })
        .mount(server)
        .await;
}

pub async fn requests_to(server: &MockServer, request_path: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.url.path() == request_path)
        .collect()
}

pub fn count_events(sink: &MemorySink, kind: EventKind, label: &str) -> usize {
    sink.events_with(kind, label).len()
}

/// WebSocket server sending every text or binary frame straight back
pub async fn start_echo_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut ws = match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => return,
                };

                while let Some(Ok(message)) = ws.next().await {
                    if (message.is_text() || message.is_binary()) && ws.send(message).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    format!("ws://{}", addr)
}

/// Address nothing listens on
pub async fn closed_ws_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    drop(listener);

    format!("ws://{}", addr)
}

/// Poll until `condition` holds, panicking after five seconds
pub async fn wait_for<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
