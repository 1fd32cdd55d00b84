//! End-to-end exercises of the signed request pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tower::ServiceExt;

use sixtun_broker::{AgentCtx, AgentDriver, BrokerResult, ProbeResult, Server, Session};
use sixtun_proto::{
    httpdate, ErrNo, IdEntry, IdList, NameEntry, NameList, RequestEnvelope, ResponseEnvelope,
    Signer, HDR_SERVICE, HDR_SIGNATURE,
};
use sixtun_server::AppState;
use sixtun_store::MemoryStore;

const SECRET: &str = "test-secret";
const PEER: &str = "sixtun-web";
const ADMIN: i64 = 9000;
const USER: i64 = 7001;

struct NullAgent;

#[async_trait]
impl AgentDriver for NullAgent {
    async fn activate(&self, _: &Server, _: &Session, _: AgentCtx) -> BrokerResult<()> {
        Ok(())
    }
    async fn deactivate(&self, _: &Server, _: &Session, _: AgentCtx) -> BrokerResult<()> {
        Ok(())
    }
    async fn check(&self, _: &Server, _: &Session, _: AgentCtx) -> BrokerResult<Vec<ProbeResult>> {
        Ok(vec![])
    }
    async fn status(&self, _: &Server, _: AgentCtx) -> BrokerResult<String> {
        Ok(r#"{"Sessions":0}"#.to_string())
    }
}

async fn state() -> Arc<AppState> {
    let state = AppState::new(
        Arc::new(MemoryStore::new()),
        Arc::new(NullAgent),
        Signer::new(SECRET),
        "broker.test",
        "sixtun",
        PEER,
        4,
    );
    state.registry.seed_admin(ADMIN).await.unwrap();
    state
}

struct RequestSpec {
    secret: &'static str,
    peer: &'static str,
    date: String,
}

impl Default for RequestSpec {
    fn default() -> Self {
        Self {
            secret: SECRET,
            peer: PEER,
            date: httpdate(chrono::Utc::now()),
        }
    }
}

fn signed_request(path: &str, uid: i64, command: &str, data: &str, spec: RequestSpec) -> Request<Body> {
    let envelope = RequestEnvelope {
        user_id: uid,
        command: command.to_string(),
        data: data.to_string(),
    };
    let body = serde_json::to_vec(&envelope).unwrap();
    let signature = Signer::new(spec.secret).sign(&body);

    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::DATE, spec.date)
        .header(HDR_SERVICE, spec.peer)
        .header(HDR_SIGNATURE, signature)
        .body(Body::from(body))
        .unwrap()
}

async fn send(state: &Arc<AppState>, req: Request<Body>) -> ResponseEnvelope {
    let response = sixtun_server::build_router(state.clone())
        .oneshot(req)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // responses are signed the same way requests are
    assert_eq!(response.headers()[HDR_SERVICE], "sixtun");
    let sig = response.headers()[HDR_SIGNATURE].to_str().unwrap().to_string();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    Signer::new(SECRET).verify(&sig, &body).unwrap();

    serde_json::from_slice(&body).unwrap()
}

fn id_batch(ids: &[i64]) -> String {
    let entry = ids
        .iter()
        .map(|&id| IdEntry {
            id,
            ..IdEntry::default()
        })
        .collect();
    serde_json::to_string(&IdList { id: 0, entry }).unwrap()
}

fn add_batch(name: &str) -> String {
    let entry = vec![NameEntry {
        name: name.to_string(),
        err_no: ErrNo::Ok,
        opt: "2400:3700:80::/48;2400:3700:81::/48;http://agent.test".to_string(),
    }];
    serde_json::to_string(&NameList { id: 0, entry }).unwrap()
}

/// Register, enable and activate one server; returns its id.
async fn ready_server(state: &Arc<AppState>, name: &str) -> i64 {
    let res = send(
        state,
        signed_request("/v/add", ADMIN, "add-server", &add_batch(name), RequestSpec::default()),
    )
    .await;
    assert_eq!(res.err_no, ErrNo::Ok);
    let list: NameList = serde_json::from_str(&res.data).unwrap();
    assert_eq!(list.entry[0].err_no, ErrNo::Ok);
    let id: i64 = list.entry[0].opt.parse().unwrap();

    for command in ["enable-server", "activate-server"] {
        let res = send(
            state,
            signed_request("/v/set", ADMIN, command, &id_batch(&[id]), RequestSpec::default()),
        )
        .await;
        assert_eq!(res.err_no, ErrNo::Ok);
    }
    id
}

#[tokio::test]
async fn test_server_status() {
    let state = state().await;
    let res = send(
        &state,
        signed_request("/status", USER, "server-status", "", RequestSpec::default()),
    )
    .await;

    assert_eq!(res.err_no, ErrNo::Ok);
    assert_eq!(res.host_name, "broker.test");
    assert_eq!(res.user_id, USER);
    assert!(res.msg_id >= 1);
    assert!(res.data.contains("\"HostName\":\"broker.test\""));
    assert!(res.data.contains("\"Received\":1"));
}

#[tokio::test]
async fn test_bad_signature_rejected_with_generic_message() {
    let state = state().await;
    let spec = RequestSpec {
        secret: "wrong-secret",
        ..RequestSpec::default()
    };
    let res = send(&state, signed_request("/status", USER, "server-status", "", spec)).await;

    assert_eq!(res.err_no, ErrNo::Forbidden);
    assert_eq!(res.data, "request cannot be processed");
}

#[tokio::test]
async fn test_stale_request_rejected_despite_valid_signature() {
    let state = state().await;
    let spec = RequestSpec {
        date: httpdate(chrono::Utc::now() - chrono::Duration::seconds(11)),
        ..RequestSpec::default()
    };
    let res = send(&state, signed_request("/status", USER, "server-status", "", spec)).await;

    assert_eq!(res.err_no, ErrNo::Forbidden);
    assert_eq!(res.data, "request cannot be processed");
}

#[tokio::test]
async fn test_wrong_peer_identity_rejected() {
    let state = state().await;
    let spec = RequestSpec {
        peer: "intruder",
        ..RequestSpec::default()
    };
    let res = send(&state, signed_request("/status", USER, "server-status", "", spec)).await;

    assert_eq!(res.err_no, ErrNo::Forbidden);
}

#[tokio::test]
async fn test_command_must_match_path() {
    let state = state().await;
    // a session command on an admin path is refused even for an admin
    let res = send(
        &state,
        signed_request("/v/set", ADMIN, "assign-session", &id_batch(&[1]), RequestSpec::default()),
    )
    .await;

    assert_eq!(res.err_no, ErrNo::Invalid);
    assert_eq!(res.data, "unknown command");
}

#[tokio::test]
async fn test_unknown_path() {
    let state = state().await;
    let res = send(
        &state,
        signed_request("/x/unknown", USER, "server-status", "", RequestSpec::default()),
    )
    .await;
    assert_eq!(res.err_no, ErrNo::Invalid);
    assert_eq!(res.data, "unknown path");
}

#[tokio::test]
async fn test_admin_scope_enforced() {
    let state = state().await;
    let res = send(
        &state,
        signed_request(
            "/v/add",
            USER,
            "add-server",
            &add_batch("a.sixtun.net"),
            RequestSpec::default(),
        ),
    )
    .await;

    // non-admin callers get the same generic refusal as bad signatures
    assert_eq!(res.err_no, ErrNo::Forbidden);
    assert_eq!(res.data, "request cannot be processed");
}

#[tokio::test]
async fn test_batch_status_change_is_element_wise() {
    let state = state().await;
    let a = ready_server(&state, "a.sixtun.net").await;
    let b = ready_server(&state, "b.sixtun.net").await;

    let res = send(
        &state,
        signed_request(
            "/v/set",
            ADMIN,
            "disable-server",
            &id_batch(&[a, b, 999]),
            RequestSpec::default(),
        ),
    )
    .await;

    // the unknown id fails alone, the rest of the batch lands
    assert_eq!(res.err_no, ErrNo::Ok);
    let list: IdList = serde_json::from_str(&res.data).unwrap();
    assert_eq!(list.entry[0].err_no, ErrNo::Ok);
    assert_eq!(list.entry[1].err_no, ErrNo::Ok);
    assert_eq!(list.entry[2].err_no, ErrNo::NotFound);
}

#[tokio::test]
async fn test_session_lifecycle_over_http() {
    let state = state().await;
    let svid = ready_server(&state, "a.sixtun.net").await;

    let res = send(
        &state,
        signed_request(
            "/s/assign",
            USER,
            "assign-session",
            &id_batch(&[svid]),
            RequestSpec::default(),
        ),
    )
    .await;
    assert_eq!(res.err_no, ErrNo::Ok);
    let list: IdList = serde_json::from_str(&res.data).unwrap();
    assert_eq!(list.id, svid);
    assert_eq!(list.entry[0].id, 1);

    // double assignment is refused
    let res = send(
        &state,
        signed_request(
            "/s/assign",
            USER,
            "assign-session",
            &id_batch(&[svid]),
            RequestSpec::default(),
        ),
    )
    .await;
    assert_eq!(res.err_no, ErrNo::Invalid);

    // activate with the client endpoint
    let data = serde_json::to_string(&IdList {
        id: 0,
        entry: vec![IdEntry {
            id: svid,
            err_no: ErrNo::Ok,
            opt: "203.0.113.5".to_string(),
        }],
    })
    .unwrap();
    let res = send(
        &state,
        signed_request("/s/set", USER, "activate-session", &data, RequestSpec::default()),
    )
    .await;
    assert_eq!(res.err_no, ErrNo::Ok);

    // the user's view carries the derived addresses
    let res = send(
        &state,
        signed_request("/s/list", USER, "list-user-sessions", "", RequestSpec::default()),
    )
    .await;
    assert_eq!(res.err_no, ErrNo::Ok);
    assert!(res.data.contains("\"Src\":\"2400:3700:80:1::1\""));
    assert!(res.data.contains("\"Rt\":\"2400:3700:81:1::/64\""));
    assert!(res.data.contains("\"Endpoint\":\"203.0.113.5\""));

    let res = send(
        &state,
        signed_request(
            "/s/assign",
            USER,
            "reassign-session",
            &id_batch(&[svid]),
            RequestSpec::default(),
        ),
    )
    .await;
    assert_eq!(res.err_no, ErrNo::Ok);
}

#[tokio::test]
async fn test_activate_requires_assignment() {
    let state = state().await;
    let svid = ready_server(&state, "a.sixtun.net").await;

    let data = serde_json::to_string(&IdList {
        id: 0,
        entry: vec![IdEntry {
            id: svid,
            err_no: ErrNo::Ok,
            opt: "203.0.113.5".to_string(),
        }],
    })
    .unwrap();
    let res = send(
        &state,
        signed_request("/s/set", USER, "activate-session", &data, RequestSpec::default()),
    )
    .await;
    assert_eq!(res.err_no, ErrNo::NotFound);
}

#[tokio::test]
async fn test_server_listing_query() {
    let state = state().await;
    ready_server(&state, "b.sixtun.net").await;
    ready_server(&state, "a.sixtun.net").await;

    let data = serde_json::to_string(&IdList {
        id: 0,
        entry: vec![IdEntry {
            id: 0,
            err_no: ErrNo::Ok,
            opt: "enabled:1:10:name".to_string(),
        }],
    })
    .unwrap();
    let res = send(
        &state,
        signed_request("/v/list", ADMIN, "list-server", &data, RequestSpec::default()),
    )
    .await;
    assert_eq!(res.err_no, ErrNo::Ok);

    let pos_a = res.data.find("a.sixtun.net").unwrap();
    let pos_b = res.data.find("b.sixtun.net").unwrap();
    assert!(pos_a < pos_b);

    // undersized pages are refused by the query parser
    let data = serde_json::to_string(&IdList {
        id: 0,
        entry: vec![IdEntry {
            id: 0,
            err_no: ErrNo::Ok,
            opt: "enabled:1:9:name".to_string(),
        }],
    })
    .unwrap();
    let res = send(
        &state,
        signed_request("/v/list", ADMIN, "list-server", &data, RequestSpec::default()),
    )
    .await;
    assert_eq!(res.err_no, ErrNo::Invalid);
}

#[tokio::test]
async fn test_resolve_round_trip() {
    let state = state().await;
    let svid = ready_server(&state, "a.sixtun.net").await;

    let data = serde_json::to_string(&NameList {
        id: 0,
        entry: vec![
            NameEntry {
                name: "a.sixtun.net".to_string(),
                ..NameEntry::default()
            },
            NameEntry {
                name: "ghost.sixtun.net".to_string(),
                ..NameEntry::default()
            },
        ],
    })
    .unwrap();
    let res = send(
        &state,
        signed_request("/v/resolve", ADMIN, "resolve-server", &data, RequestSpec::default()),
    )
    .await;
    assert_eq!(res.err_no, ErrNo::Ok);
    let list: NameList = serde_json::from_str(&res.data).unwrap();
    assert_eq!(list.entry[0].opt, svid.to_string());
    assert_eq!(list.entry[1].err_no, ErrNo::NotFound);
}
