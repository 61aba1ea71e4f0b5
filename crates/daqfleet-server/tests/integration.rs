use axum::http::StatusCode;
use daqfleet_core::{Driver, Topology};
use http_body_util::BodyExt;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// One-line-per-connection agent that reports a daemon running once it has
/// been started and answers `ok` to everything else.
struct Agent {
    port: u16,
    requests: Arc<Mutex<Vec<String>>>,
}

impl Agent {
    async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let seen = seen.clone();
                tokio::spawn(async move {
                    let (reader, mut writer) = stream.into_split();
                    let mut line = String::new();
                    if BufReader::new(reader).read_line(&mut line).await.unwrap_or(0) == 0 {
                        return;
                    }
                    let line = line.trim_end().to_string();
                    let reply = {
                        let mut seen = seen.lock().unwrap();
                        seen.push(line.clone());
                        if line == "daemon_info" {
                            let mut out = String::new();
                            for daemon in ["master_control", "results_manager"] {
                                let start = format!("start_daemon {daemon}");
                                let code = if seen.contains(&start) { 2 } else { 0 };
                                out.push_str(&format!("{daemon}={code}\n"));
                            }
                            out.push_str("ok\n");
                            out
                        } else {
                            "ok\n".to_string()
                        }
                    };
                    let _ = writer.write_all(reply.as_bytes()).await;
                });
            }
        });
        Self { port, requests }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn topology(agent: &Agent) -> Topology {
    let yaml = format!(
        r#"name: api-test
hosts:
  - {{name: srv0, role: server, address: 127.0.0.1, port: {port}}}
  - {{name: node0, role: node, address: 127.0.0.1, port: {port}}}
daemons:
  - name: master_control
    kind: master_control
    roles: [server, node]
    tier: 0
  - name: results_manager
    roles: [server]
    tier: 1
agent:
  connect_attempts: 1
  connect_backoff_ms: 0
  io_timeout_ms: 500
  response_timeout_ms: 1000
"#,
        port = agent.port
    );
    Topology::from_yaml_str(&yaml).unwrap()
}

async fn app() -> (axum::Router, Arc<Driver>, Agent) {
    let agent = Agent::spawn().await;
    let driver = Arc::new(Driver::from_topology(topology(&agent)));
    (daqfleet_server::build_router(driver.clone()), driver, agent)
}

/// Send a GET request via `oneshot` and return (status, parsed JSON body).
async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Send a POST request with a JSON body via `oneshot` and return (status, parsed JSON body).
async fn post_json(
    app: axum::Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_is_empty_before_first_collection() {
    let (app, _, _agent) = app().await;
    let (status, body) = get(app, "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hosts"], serde_json::json!({}));
    assert!(body["collected_at"].is_string());
}

#[tokio::test]
async fn status_refresh_collects_every_host() {
    let (app, _, agent) = app().await;
    let (status, body) = get(app, "/api/status?refresh=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hosts"]["srv0"]["reachable"], true);
    assert_eq!(body["hosts"]["node0"]["reachable"], true);
    assert_eq!(body["hosts"]["srv0"]["daemons"]["results_manager"], "stopped");
    assert_eq!(agent.requests(), vec!["daemon_info", "daemon_info"]);
}

#[tokio::test]
async fn refreshed_status_is_published_to_later_reads() {
    let (app, driver, _agent) = app().await;
    driver.refresh().await;
    let (_, body) = get(app, "/api/status").await;
    assert_eq!(body["hosts"]["node0"]["role"], "node");
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn current_run_is_null_before_any_run() {
    let (app, _, _agent) = app().await;
    let (status, body) = get(app, "/api/runs/current").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_null());
}

#[tokio::test]
async fn begin_run_returns_active_run_state() {
    let (app, _, _agent) = app().await;
    let (status, body) = post_json(
        app.clone(),
        "/api/runs",
        serde_json::json!({ "direction": "start" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["direction"], "start");
    assert_eq!(body["phase"], "active");
    assert_eq!(body["stage"], 0);
    assert_eq!(body["stage_count"], 2);
    assert_eq!(body["stage_label"], "master control");

    let run_id = body["run_id"].as_str().unwrap().to_string();
    let (status, body) = get(app.clone(), &format!("/api/runs/{run_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["run_id"], run_id.as_str());

    let (_, current) = get(app, "/api/runs/current").await;
    assert_eq!(current["run_id"], run_id.as_str());
}

#[tokio::test]
async fn newer_run_supersedes_older() {
    let (app, _, _agent) = app().await;
    let (_, first) = post_json(
        app.clone(),
        "/api/runs",
        serde_json::json!({ "direction": "start" }),
    )
    .await;
    post_json(
        app.clone(),
        "/api/runs",
        serde_json::json!({ "direction": "stop" }),
    )
    .await;
    let id = first["run_id"].as_str().unwrap();
    let (status, body) = get(app, &format!("/api/runs/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "superseded");
}

#[tokio::test]
async fn run_progresses_when_driver_ticks() {
    let (app, driver, agent) = app().await;
    let (_, body) = post_json(
        app.clone(),
        "/api/runs",
        serde_json::json!({ "direction": "start" }),
    )
    .await;
    for _ in 0..5 {
        driver.tick().await;
    }
    assert!(agent
        .requests()
        .contains(&"start_daemon master_control".to_string()));
    let id = body["run_id"].as_str().unwrap();
    let (_, state) = get(app, &format!("/api/runs/{id}")).await;
    assert_eq!(state["history"][0]["label"], "master control");
}

#[tokio::test]
async fn current_run_is_null_once_the_run_completes() {
    let (app, driver, _agent) = app().await;
    let (_, body) = post_json(
        app.clone(),
        "/api/runs",
        serde_json::json!({ "direction": "start" }),
    )
    .await;
    let (_, current) = get(app.clone(), "/api/runs/current").await;
    assert_eq!(current["run_id"], body["run_id"]);

    for _ in 0..5 {
        driver.tick().await;
    }
    let (status, current) = get(app.clone(), "/api/runs/current").await;
    assert_eq!(status, StatusCode::OK);
    assert!(current.is_null());

    let id = body["run_id"].as_str().unwrap();
    let (_, state) = get(app, &format!("/api/runs/{id}")).await;
    assert_eq!(state["phase"], "completed");
}

#[tokio::test]
async fn begin_run_rejects_unknown_direction() {
    let (app, _, _agent) = app().await;
    let (status, body) = post_json(
        app,
        "/api/runs",
        serde_json::json!({ "direction": "sideways" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("sideways"));
}

#[tokio::test]
async fn unknown_run_is_404() {
    let (app, _, _agent) = app().await;
    let (status, body) = get(app, &format!("/api/runs/{}", uuid::Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[tokio::test]
async fn command_goes_to_daemon_hosts() {
    let (app, _, agent) = app().await;
    let (status, body) = post_json(
        app,
        "/api/commands",
        serde_json::json!({ "verb": "start", "target": "results_manager" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["line"], "start_daemon results_manager");
    assert_eq!(body["outcomes"].as_array().unwrap().len(), 1);
    assert_eq!(body["outcomes"][0]["host"], "srv0");
    assert_eq!(body["outcomes"][0]["outcome"], "ok");
    assert_eq!(agent.requests(), vec!["start_daemon results_manager"]);
}

#[tokio::test]
async fn command_to_named_hosts_with_unit() {
    let (app, _, agent) = app().await;
    let (status, body) = post_json(
        app,
        "/api/commands",
        serde_json::json!({
            "verb": "stop",
            "target": "pwcs",
            "hosts": ["node0"],
            "unit": 1,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcomes"][0]["host"], "node0");
    assert_eq!(agent.requests(), vec!["stop_pwcs unit=1"]);
}

#[tokio::test]
async fn command_rejects_unknown_verb() {
    let (app, _, agent) = app().await;
    let (status, _) = post_json(
        app,
        "/api/commands",
        serde_json::json!({ "verb": "reboot", "target": "all" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(agent.requests().is_empty());
}

#[tokio::test]
async fn command_rejects_mismatched_target() {
    let (app, _, agent) = app().await;
    let (status, body) = post_json(
        app,
        "/api/commands",
        serde_json::json!({ "verb": "init", "target": "pwcs" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("pwcs"));
    assert!(agent.requests().is_empty());
}

#[tokio::test]
async fn command_rejects_unknown_host() {
    let (app, _, _agent) = app().await;
    let (status, body) = post_json(
        app,
        "/api/commands",
        serde_json::json!({ "verb": "status", "hosts": ["node42"] }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("node42"));
}

// ---------------------------------------------------------------------------
// Topology and events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn topology_is_served_as_json() {
    let (app, _, _agent) = app().await;
    let (status, body) = get(app, "/api/topology").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "api-test");
    assert_eq!(body["hosts"].as_array().unwrap().len(), 2);
    assert_eq!(body["daemons"][1]["name"], "results_manager");
}

#[tokio::test]
async fn events_endpoint_is_an_sse_stream() {
    let (app, _, _agent) = app().await;
    let req = axum::http::Request::builder()
        .uri("/api/events")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let ct = response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(ct.starts_with("text/event-stream"), "{ct}");
}
