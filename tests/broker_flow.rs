//! End-to-end broker flows against the in-process store and a recording
//! sink: registration, relay in both dialects, authorization denials, the
//! session lock, billing sessions, and delivery survivability.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use modulr_broker::sink::{FrameSink, SinkError};
use modulr_broker::store::{
    ConnectionKind, ConnectionRecord, ConnectionsRepo, KeyValue, MemoryStore, PresenceRepo,
    Protocol, SessionsRepo,
};
use modulr_broker::{Broker, Config, SocketEvent};

/// Sink double: records every post, simulates gone peers.
#[derive(Default)]
struct RecordingSink {
    posts: Mutex<Vec<(String, Value)>>,
    gone: Mutex<HashSet<String>>,
}

impl RecordingSink {
    fn frames_to(&self, connection_id: &str) -> Vec<Value> {
        self.posts
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|(to, _)| to == connection_id)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    fn all_posts(&self) -> Vec<(String, Value)> {
        self.posts.lock().expect("lock poisoned").clone()
    }

    fn mark_gone(&self, connection_id: &str) {
        self.gone
            .lock()
            .expect("lock poisoned")
            .insert(connection_id.to_string());
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn post(&self, connection_id: &str, bytes: &[u8]) -> Result<(), SinkError> {
        if self
            .gone
            .lock()
            .expect("lock poisoned")
            .contains(connection_id)
        {
            return Err(SinkError::Gone);
        }
        let frame = serde_json::from_slice(bytes).expect("valid JSON frame");
        self.posts
            .lock()
            .expect("lock poisoned")
            .push((connection_id.to_string(), frame));
        Ok(())
    }
}

struct TestBed {
    broker: Broker,
    store: Arc<MemoryStore>,
    sink: Arc<RecordingSink>,
}

fn test_config(allow_no_token: bool) -> Config {
    Config {
        connections_table: "connections".to_string(),
        robot_presence_table: "presence".to_string(),
        revoked_tokens_table: "revoked".to_string(),
        robot_operators_table: "operators".to_string(),
        robots_table: "robots".to_string(),
        sessions_table: Some("sessions".to_string()),
        user_credits_table: Some("credits".to_string()),
        platform_settings_table: Some("settings".to_string()),
        sink_endpoint: None,
        user_pool_id: "pool-1".to_string(),
        region: "eu-west-1".to_string(),
        allow_no_token,
        lenient_client_target: false,
        listen_addr: "127.0.0.1:0".to_string(),
    }
}

fn bed() -> TestBed {
    bed_with(test_config(false))
}

fn bed_with(config: Config) -> TestBed {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::default());
    let broker = Broker::new(
        &config,
        Arc::clone(&store) as Arc<dyn KeyValue>,
        Arc::clone(&sink) as Arc<dyn FrameSink>,
    );
    TestBed {
        broker,
        store,
        sink,
    }
}

impl TestBed {
    fn connections(&self) -> ConnectionsRepo {
        ConnectionsRepo::new(Arc::clone(&self.store) as Arc<dyn KeyValue>, "connections")
    }

    fn presence(&self) -> PresenceRepo {
        PresenceRepo::new(Arc::clone(&self.store) as Arc<dyn KeyValue>, "presence")
    }

    fn sessions(&self) -> SessionsRepo {
        SessionsRepo::new(Arc::clone(&self.store) as Arc<dyn KeyValue>, "sessions")
    }

    /// Seed a live connection row, as a completed handshake would.
    async fn seed_connection(&self, id: &str, user: &str, groups: &str, protocol: Protocol) {
        self.connections()
            .put(&ConnectionRecord {
                connection_id: id.to_string(),
                user_id: user.to_string(),
                username: user.to_string(),
                email: format!("{user}@x"),
                groups: groups.to_string(),
                kind: ConnectionKind::Client,
                monitoring_robot_id: None,
                protocol,
                ts: 0,
            })
            .await
            .expect("seed connection");
    }

    async fn frame(&self, connection_id: &str, body: Value) -> u16 {
        self.broker
            .handle(&SocketEvent::frame(connection_id, body.to_string()))
            .await
            .status
    }
}

// ─── End-to-end scenarios ──────────────────────────────────────────────────

#[tokio::test]
async fn register_claims_presence() {
    let bed = bed();
    bed.seed_connection("R1", "alice", "", Protocol::Legacy).await;

    let status = bed
        .frame("R1", json!({"type": "register", "robotId": "r-1"}))
        .await;
    assert_eq!(status, 200);

    let row = bed.presence().get("r-1").await.unwrap().unwrap();
    assert_eq!(row.owner_user_id, "alice");
    assert_eq!(row.connection_id, "R1");
    assert_eq!(row.status, "online");
}

#[tokio::test]
async fn offer_is_forwarded_to_robot_in_legacy_form() {
    let bed = bed();
    bed.seed_connection("C1", "alice", "", Protocol::Legacy).await;
    bed.seed_connection("R1", "alice", "", Protocol::Legacy).await;
    bed.frame("R1", json!({"type": "register", "robotId": "r-1"}))
        .await;

    let status = bed
        .frame(
            "C1",
            json!({"type": "offer", "robotId": "r-1", "payload": {"sdp": "v=0..."}}),
        )
        .await;
    assert_eq!(status, 200);

    let to_robot = bed.sink.frames_to("R1");
    assert_eq!(to_robot.len(), 1);
    assert_eq!(
        to_robot[0],
        json!({"type": "offer", "to": "r-1", "from": "C1", "sdp": "v=0..."})
    );

    // Free robot: the delivered offer opened a session.
    let created: Vec<Value> = bed
        .sink
        .frames_to("C1")
        .into_iter()
        .filter(|f| f["type"] == "session-created")
        .collect();
    assert_eq!(created.len(), 1);
    assert_eq!(bed.sessions().active_by_user("alice").await.unwrap().len(), 1);
}

#[tokio::test]
async fn offer_to_unregistered_robot_is_404() {
    let bed = bed();
    bed.seed_connection("C1", "alice", "", Protocol::Legacy).await;

    let status = bed
        .frame(
            "C1",
            json!({"type": "offer", "robotId": "r-1", "payload": {"sdp": "v=0..."}}),
        )
        .await;
    assert_eq!(status, 404);
    assert!(bed.sink.all_posts().is_empty());
}

#[tokio::test]
async fn versioned_offer_reaches_versioned_robot_translated() {
    let bed = bed();
    bed.seed_connection("C1", "alice", "", Protocol::Legacy).await;
    bed.seed_connection("R1", "alice", "", Protocol::ModulrV0).await;
    bed.frame("R1", json!({"type": "register", "robotId": "r-1"}))
        .await;

    let status = bed
        .frame(
            "C1",
            json!({
                "type": "signalling.offer",
                "version": "0.0",
                "id": "m1",
                "timestamp": "2026-02-01T00:00:00Z",
                "payload": {"robotId": "r-1", "connectionId": "C1", "sdp": "v=0...", "sdpType": "offer"}
            }),
        )
        .await;
    assert_eq!(status, 200);

    let to_robot = bed.sink.frames_to("R1");
    assert_eq!(to_robot.len(), 1);
    let envelope = &to_robot[0];
    assert_eq!(envelope["type"], "signalling.offer");
    assert_eq!(envelope["version"], "0.0");
    assert!(!envelope["id"].as_str().unwrap().is_empty());
    assert!(!envelope["timestamp"].as_str().unwrap().is_empty());
    assert_eq!(
        envelope["payload"],
        json!({"sdp": "v=0...", "sdpType": "offer", "connectionId": "C1"})
    );

    // Speaking a versioned frame promoted the client connection.
    let row = bed.connections().get("C1").await.unwrap().unwrap();
    assert_eq!(row.protocol, Protocol::ModulrV0);
}

#[tokio::test]
async fn agent_ping_gets_correlated_agent_pong() {
    let bed = bed();
    bed.seed_connection("C1", "alice", "", Protocol::Legacy).await;

    let status = bed.frame("C1", json!({"type": "agent.ping", "id": "p1"})).await;
    assert_eq!(status, 200);

    let frames = bed.sink.frames_to("C1");
    assert_eq!(frames.len(), 1);
    let pong = &frames[0];
    assert_eq!(pong["type"], "agent.pong");
    assert_eq!(pong["version"], "0.0");
    assert_eq!(pong["id"], "p1-pong");
    assert_eq!(pong["correlationId"], "p1");
    assert!(!pong["timestamp"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn legacy_ping_gets_bare_pong() {
    let bed = bed();
    bed.seed_connection("C1", "alice", "", Protocol::Legacy).await;

    assert_eq!(bed.frame("C1", json!({"type": "ping"})).await, 200);
    assert_eq!(bed.sink.frames_to("C1"), vec![json!({"type": "pong"})]);
}

#[tokio::test]
async fn takeover_requires_ownership() {
    let bed = bed();
    bed.seed_connection("R1", "alice", "", Protocol::Legacy).await;
    bed.seed_connection("C2", "bob", "", Protocol::Legacy).await;
    bed.frame("R1", json!({"type": "register", "robotId": "r-1"}))
        .await;
    bed.sink.posts.lock().unwrap().clear();

    // Neither owner, admin, nor delegate: 403, no sink call.
    let status = bed
        .frame("C2", json!({"type": "takeover", "robotId": "r-1"}))
        .await;
    assert_eq!(status, 403);
    assert!(bed.sink.all_posts().is_empty());

    // The owner's takeover reaches the robot.
    bed.seed_connection("C1", "alice", "", Protocol::Legacy).await;
    let status = bed
        .frame("C1", json!({"type": "takeover", "robotId": "r-1"}))
        .await;
    assert_eq!(status, 200);
    let frames = bed.sink.frames_to("R1");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "admin-takeover");
    assert_eq!(frames[0]["robotId"], "r-1");
}

// ─── Testable properties ───────────────────────────────────────────────────

#[tokio::test]
async fn second_claim_by_other_user_conflicts() {
    let bed = bed();
    bed.seed_connection("R1", "alice", "", Protocol::Legacy).await;
    bed.seed_connection("R2", "bob", "", Protocol::Legacy).await;

    assert_eq!(
        bed.frame("R1", json!({"type": "register", "robotId": "r-1"}))
            .await,
        200
    );
    assert_eq!(
        bed.frame("R2", json!({"type": "register", "robotId": "r-1"}))
            .await,
        409
    );

    let row = bed.presence().get("r-1").await.unwrap().unwrap();
    assert_eq!(row.owner_user_id, "alice");
    assert_eq!(row.connection_id, "R1");
}

#[tokio::test]
async fn admin_can_force_claim() {
    let bed = bed();
    bed.seed_connection("R1", "alice", "", Protocol::Legacy).await;
    bed.seed_connection("R2", "root", "ADMINS", Protocol::Legacy).await;

    bed.frame("R1", json!({"type": "register", "robotId": "r-1"}))
        .await;
    assert_eq!(
        bed.frame("R2", json!({"type": "register", "robotId": "r-1"}))
            .await,
        200
    );
    let row = bed.presence().get("r-1").await.unwrap().unwrap();
    assert_eq!(row.owner_user_id, "root");
    assert_eq!(row.connection_id, "R2");
}

#[tokio::test]
async fn acl_denies_unlisted_user_with_in_band_error() {
    let bed = bed();
    bed.seed_connection("R1", "carol", "", Protocol::Legacy).await;
    bed.seed_connection("C2", "bob", "", Protocol::Legacy).await;
    bed.frame("R1", json!({"type": "register", "robotId": "r-1"}))
        .await;
    bed.store
        .put(
            "robots",
            "row-1",
            json!({"robotId": "r-1", "allowedUsers": ["alice@x"]}),
        )
        .await
        .unwrap();

    let status = bed
        .frame(
            "C2",
            json!({"type": "offer", "robotId": "r-1", "payload": {"sdp": "x"}}),
        )
        .await;
    assert_eq!(status, 403);

    // No delivery to the robot, but an in-band error to the caller.
    assert!(bed.sink.frames_to("R1").is_empty());
    let errors = bed.sink.frames_to("C2");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["type"], "error");
    assert_eq!(errors[0]["error"], "access_denied");
    assert_eq!(errors[0]["robotId"], "r-1");
}

#[tokio::test]
async fn acl_admits_listed_email() {
    let bed = bed();
    bed.seed_connection("R1", "carol", "", Protocol::Legacy).await;
    bed.seed_connection("C1", "alice", "", Protocol::Legacy).await;
    bed.frame("R1", json!({"type": "register", "robotId": "r-1"}))
        .await;
    bed.store
        .put(
            "robots",
            "row-1",
            json!({"robotId": "r-1", "allowedUsers": ["alice@x"]}),
        )
        .await
        .unwrap();

    let status = bed
        .frame(
            "C1",
            json!({"type": "offer", "robotId": "r-1", "payload": {"sdp": "x"}}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(bed.sink.frames_to("R1").len(), 1);
}

#[tokio::test]
async fn session_lock_rejects_second_user() {
    let bed = bed();
    bed.seed_connection("R1", "alice", "", Protocol::Legacy).await;
    bed.seed_connection("C1", "alice", "", Protocol::Legacy).await;
    bed.seed_connection("C2", "bob", "", Protocol::Legacy).await;
    bed.frame("R1", json!({"type": "register", "robotId": "r-1"}))
        .await;

    // Alice's offer opens the session and takes the lock.
    bed.frame(
        "C1",
        json!({"type": "offer", "robotId": "r-1", "payload": {"sdp": "x"}}),
    )
    .await;
    bed.sink.posts.lock().unwrap().clear();

    let status = bed
        .frame(
            "C2",
            json!({"type": "offer", "robotId": "r-1", "payload": {"sdp": "x"}}),
        )
        .await;
    assert_eq!(status, 423);

    assert!(bed.sink.frames_to("R1").is_empty());
    let frames = bed.sink.frames_to("C2");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "session-locked");
    assert_eq!(frames[0]["robotId"], "r-1");
    assert_eq!(frames[0]["lockedBy"], "alice@x");
}

#[tokio::test]
async fn same_user_reoffer_passes_the_lock() {
    let bed = bed();
    bed.seed_connection("R1", "alice", "", Protocol::Legacy).await;
    bed.seed_connection("C1", "alice", "", Protocol::Legacy).await;
    bed.frame("R1", json!({"type": "register", "robotId": "r-1"}))
        .await;

    bed.frame(
        "C1",
        json!({"type": "offer", "robotId": "r-1", "payload": {"sdp": "x"}}),
    )
    .await;
    let status = bed
        .frame(
            "C1",
            json!({"type": "offer", "robotId": "r-1", "payload": {"sdp": "x"}}),
        )
        .await;
    assert_eq!(status, 200);
    // Still exactly one active session.
    assert_eq!(bed.sessions().active_by_user("alice").await.unwrap().len(), 1);
}

#[tokio::test]
async fn gone_robot_still_yields_200_and_no_session() {
    let bed = bed();
    bed.seed_connection("C1", "alice", "", Protocol::Legacy).await;
    bed.seed_connection("R1", "alice", "", Protocol::Legacy).await;
    bed.frame("R1", json!({"type": "register", "robotId": "r-1"}))
        .await;
    bed.sink.mark_gone("R1");

    let status = bed
        .frame(
            "C1",
            json!({"type": "offer", "robotId": "r-1", "payload": {"sdp": "x"}}),
        )
        .await;
    assert_eq!(status, 200);

    // Delivery never happened, so no session was opened.
    assert!(bed.sessions().active_by_user("alice").await.unwrap().is_empty());
    assert!(bed
        .sink
        .frames_to("C1")
        .iter()
        .all(|f| f["type"] != "session-created"));
}

#[tokio::test]
async fn monitor_sees_frames_before_delivery() {
    let bed = bed();
    bed.seed_connection("C1", "alice", "", Protocol::Legacy).await;
    bed.seed_connection("R1", "alice", "", Protocol::Legacy).await;
    bed.seed_connection("M1", "observer", "", Protocol::Legacy).await;
    bed.frame("R1", json!({"type": "register", "robotId": "r-1"}))
        .await;

    let status = bed
        .frame("M1", json!({"type": "monitor", "robotId": "r-1"}))
        .await;
    assert_eq!(status, 200);
    let confirmed = bed.sink.frames_to("M1");
    assert_eq!(confirmed.last().unwrap()["type"], "monitor-confirmed");
    bed.sink.posts.lock().unwrap().clear();

    bed.frame(
        "C1",
        json!({"type": "offer", "robotId": "r-1", "payload": {"sdp": "x"}}),
    )
    .await;

    let posts = bed.sink.all_posts();
    let monitor_idx = posts
        .iter()
        .position(|(to, f)| to == "M1" && f["_monitor"] == true)
        .expect("monitor copy emitted");
    let delivery_idx = posts
        .iter()
        .position(|(to, f)| to == "R1" && f["type"] == "offer")
        .expect("offer delivered");
    assert!(monitor_idx < delivery_idx);

    let copy = &posts[monitor_idx].1;
    assert_eq!(copy["_source"], "C1");
    assert_eq!(copy["_target"], "robot");
    assert_eq!(copy["_direction"], "client-to-robot");
}

#[tokio::test]
async fn monitor_still_sees_frames_when_robot_is_gone() {
    let bed = bed();
    bed.seed_connection("C1", "alice", "", Protocol::Legacy).await;
    bed.seed_connection("R1", "alice", "", Protocol::Legacy).await;
    bed.seed_connection("M1", "observer", "", Protocol::Legacy).await;
    bed.frame("R1", json!({"type": "register", "robotId": "r-1"}))
        .await;
    bed.frame("M1", json!({"type": "monitor", "robotId": "r-1"}))
        .await;
    bed.sink.posts.lock().unwrap().clear();
    bed.sink.mark_gone("R1");

    let status = bed
        .frame(
            "C1",
            json!({"type": "offer", "robotId": "r-1", "payload": {"sdp": "x"}}),
        )
        .await;
    assert_eq!(status, 200);

    let copies = bed.sink.frames_to("M1");
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0]["_monitor"], true);
}

// ─── Handshake and lifecycle ───────────────────────────────────────────────

#[tokio::test]
async fn dev_mode_connect_writes_row_and_pushes_welcome() {
    let bed = bed_with(test_config(true));

    let resp = bed
        .broker
        .handle(&SocketEvent::connect("C-new", Default::default()))
        .await;
    assert_eq!(resp.status, 200);

    let row = bed.connections().get("C-new").await.unwrap().unwrap();
    assert_eq!(row.user_id, "local-dev");
    let frames = bed.sink.frames_to("C-new");
    assert_eq!(
        frames[0],
        json!({"type": "welcome", "connectionId": "C-new"})
    );
}

#[tokio::test]
async fn connect_without_token_is_rejected_outside_dev_mode() {
    let bed = bed();
    let resp = bed
        .broker
        .handle(&SocketEvent::connect("C-new", Default::default()))
        .await;
    assert_eq!(resp.status, 401);
    assert!(bed.connections().get("C-new").await.unwrap().is_none());
}

#[tokio::test]
async fn disconnect_completes_sessions_and_deletes_row() {
    let bed = bed();
    bed.seed_connection("C1", "alice", "", Protocol::Legacy).await;
    bed.seed_connection("R1", "alice", "", Protocol::Legacy).await;
    bed.frame("R1", json!({"type": "register", "robotId": "r-1"}))
        .await;
    bed.frame(
        "C1",
        json!({"type": "offer", "robotId": "r-1", "payload": {"sdp": "x"}}),
    )
    .await;
    assert_eq!(bed.sessions().active_by_connection("C1").await.unwrap().len(), 1);

    let resp = bed.broker.handle(&SocketEvent::disconnect("C1")).await;
    assert_eq!(resp.status, 200);

    assert!(bed.connections().get("C1").await.unwrap().is_none());
    assert!(bed
        .sessions()
        .active_by_connection("C1")
        .await
        .unwrap()
        .is_empty());
}

// ─── Frame hygiene ─────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_type_is_400() {
    let bed = bed();
    bed.seed_connection("C1", "alice", "", Protocol::Legacy).await;
    assert_eq!(bed.frame("C1", json!({"type": "frobnicate"})).await, 400);
}

#[tokio::test]
async fn invalid_json_is_400_before_auth() {
    let bed = bed();
    let resp = bed
        .broker
        .handle(&SocketEvent::frame("ghost", "{not json"))
        .await;
    assert_eq!(resp.status, 400);
    assert_eq!(resp.body, "Invalid JSON");
}

#[tokio::test]
async fn unauthenticated_frame_is_401() {
    let bed = bed();
    assert_eq!(bed.frame("ghost", json!({"type": "ping"})).await, 401);
}

#[tokio::test]
async fn capabilities_lists_supported_versions() {
    let bed = bed();
    bed.seed_connection("C1", "alice", "", Protocol::Legacy).await;

    let status = bed
        .frame("C1", json!({"type": "signalling.capabilities", "id": "c1"}))
        .await;
    assert_eq!(status, 200);

    let frames = bed.sink.frames_to("C1");
    assert_eq!(frames.len(), 1);
    assert_eq!(
        frames[0]["payload"]["supportedVersions"],
        json!(["0.0", "0.1"])
    );
}

#[tokio::test]
async fn pong_refreshes_keepalive_timestamp() {
    let bed = bed();
    bed.seed_connection("C1", "alice", "", Protocol::Legacy).await;

    assert_eq!(bed.frame("C1", json!({"type": "pong"})).await, 200);
    let row = bed.connections().get("C1").await.unwrap().unwrap();
    assert!(row.ts > 0);
}
