//! Request verification pipeline and signed responses.
//!
//! Every inbound request passes the same gauntlet before its handler
//! runs: known path, well-formed request, expected peer identity, live
//! store, decodable envelope, valid signature, fresh timestamp, allowed
//! command for the path, and admin scope where required. The first
//! failing stage wins; nothing later is evaluated.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, Response};
use tracing::{debug, warn};

use sixtun_proto::{
    check_freshness, check_service, httpdate, parse_httpdate, Command, ErrNo, RequestEnvelope,
    ResponseEnvelope, HDR_SERVICE, HDR_SIGNATURE,
};

use crate::handlers;
use crate::stats::Reject;
use crate::AppState;

/// Route groups; the command set of each path is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Group {
    Admin,
    Session,
    Status,
}

fn allowed(group: Group, op: &str) -> Option<&'static [Command]> {
    Some(match (group, op) {
        (Group::Admin, "resolve") => &[Command::ResolveServer, Command::ResolveServerId],
        (Group::Admin, "add") => &[Command::AddServer],
        (Group::Admin, "set") => &[
            Command::SetServerAttr,
            Command::EnableServer,
            Command::DisableServer,
            Command::ActivateServer,
            Command::DeactivateServer,
        ],
        (Group::Admin, "list") => &[Command::ListServer, Command::GetServerList],
        (Group::Admin, "status") => &[Command::TunnelServerStatus],
        (Group::Admin, "info") => &[Command::ServerInfo],
        (Group::Session, "assign") => &[Command::AssignSession, Command::ReassignSession],
        (Group::Session, "set") => &[
            Command::ActivateSession,
            Command::DeactivateSession,
            Command::CheckSession,
        ],
        (Group::Session, "list") => &[Command::ListUserSessions, Command::ListUserServers],
        (Group::Status, "") => &[Command::ServerStatus],
        _ => return None,
    })
}

/// A request stopped before its handler ran.
struct Rejection {
    stage: Reject,
    err_no: ErrNo,
    msg: &'static str,
    user_id: i64,
}

impl Rejection {
    fn new(stage: Reject, err_no: ErrNo, msg: &'static str) -> Self {
        Self {
            stage,
            err_no,
            msg,
            user_id: 0,
        }
    }
}

pub async fn admin(
    State(state): State<Arc<AppState>>,
    Path(op): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    dispatch(state, Group::Admin, &op, headers, body).await
}

pub async fn session(
    State(state): State<Arc<AppState>>,
    Path(op): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    dispatch(state, Group::Session, &op, headers, body).await
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    dispatch(state, Group::Status, "", headers, body).await
}

/// Fallback for paths outside the fixed route table.
pub async fn unknown(State(state): State<Arc<AppState>>) -> Response<Body> {
    state.stats.received();
    state.stats.rejected(Reject::Path);
    respond(&state, 0, 0, ErrNo::Invalid, "unknown path".to_string()).await
}

async fn dispatch(
    state: Arc<AppState>,
    group: Group,
    op: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    state.stats.received();

    match verify(&state, group, op, &headers, &body).await {
        Ok((command, envelope)) => {
            let msg_id = next_msg_id(&state).await;
            let result = handlers::execute(&state, command, &envelope, msg_id).await;

            let (err_no, data) = match result {
                Ok(data) => (ErrNo::Ok, data),
                Err(e) => {
                    debug!(command = command.as_str(), error = %e, "command failed");
                    (e.errno(), e.to_string())
                }
            };
            state.stats.handled(command.as_str(), err_no == ErrNo::Ok);

            respond(&state, envelope.user_id, msg_id, err_no, data).await
        }
        Err(r) => {
            state.stats.rejected(r.stage);
            respond(&state, r.user_id, 0, r.err_no, r.msg.to_string()).await
        }
    }
}

/// Run the pre-handler stages in order, yielding the parsed envelope.
async fn verify(
    state: &AppState,
    group: Group,
    op: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<(Command, RequestEnvelope), Rejection> {
    let commands = allowed(group, op).ok_or_else(|| {
        Rejection::new(Reject::Path, ErrNo::Invalid, "unknown operation")
    })?;

    let content_type = header_str(headers, header::CONTENT_TYPE.as_str());
    if !content_type.starts_with("application/json") {
        return Err(Rejection::new(
            Reject::Form,
            ErrNo::Invalid,
            "unsupported content type",
        ));
    }

    check_service(&state.peer_name, header_str(headers, HDR_SERVICE)).map_err(|_| {
        Rejection::new(Reject::Service, ErrNo::Forbidden, "request cannot be processed")
    })?;

    if state.store.ping().await.is_err() {
        warn!("store unreachable, refusing request");
        return Err(Rejection::new(
            Reject::Store,
            ErrNo::Again,
            "service temporarily unavailable",
        ));
    }

    let envelope: RequestEnvelope = serde_json::from_slice(body).map_err(|_| {
        Rejection::new(Reject::Payload, ErrNo::Invalid, "invalid request data")
    })?;
    let user_id = envelope.user_id;
    let with_uid = |mut r: Rejection| {
        r.user_id = user_id;
        r
    };

    // the signature covers the exact bytes on the wire, checked before
    // anything in the payload is trusted
    state
        .signer
        .verify(header_str(headers, HDR_SIGNATURE), body)
        .map_err(|_| {
            with_uid(Rejection::new(
                Reject::Signature,
                ErrNo::Forbidden,
                "request cannot be processed",
            ))
        })?;

    let date = parse_httpdate(header_str(headers, header::DATE.as_str())).map_err(|_| {
        with_uid(Rejection::new(
            Reject::Expired,
            ErrNo::Forbidden,
            "request cannot be processed",
        ))
    })?;
    check_freshness(date).map_err(|_| {
        with_uid(Rejection::new(
            Reject::Expired,
            ErrNo::Forbidden,
            "request cannot be processed",
        ))
    })?;

    let command = Command::parse(&envelope.command)
        .filter(|c| commands.contains(c))
        .ok_or_else(|| {
            with_uid(Rejection::new(
                Reject::Command,
                ErrNo::Invalid,
                "unknown command",
            ))
        })?;

    if group == Group::Admin {
        let is_admin = state.registry.is_admin(user_id).await.unwrap_or(false);
        if !is_admin {
            return Err(with_uid(Rejection::new(
                Reject::Scope,
                ErrNo::Forbidden,
                "request cannot be processed",
            )));
        }
    }

    Ok((command, envelope))
}

async fn next_msg_id(state: &AppState) -> i64 {
    match state.store.incr(sixtun_broker::keys::MSGID_NEXT).await {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "message id counter unavailable");
            0
        }
    }
}

/// Serialize, sign and emit the response envelope. The signature covers
/// the serialized bytes verbatim.
async fn respond(
    state: &AppState,
    user_id: i64,
    msg_id: i64,
    err_no: ErrNo,
    data: String,
) -> Response<Body> {
    let envelope = ResponseEnvelope {
        host_name: state.host_name.clone(),
        user_id,
        msg_id,
        err_no,
        data,
    };

    let body = match serde_json::to_vec(&envelope) {
        Ok(b) => b,
        Err(e) => {
            // not reachable for these types; fail closed if it ever is
            warn!(error = %e, "response serialization failed");
            Vec::new()
        }
    };
    let signature = state.signer.sign(&body);

    let mut response = Response::new(Body::from(body));
    let h = response.headers_mut();
    h.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Ok(v) = HeaderValue::from_str(&httpdate(chrono::Utc::now())) {
        h.insert(header::DATE, v);
    }
    if let Ok(v) = HeaderValue::from_str(&state.service_name) {
        h.insert(HDR_SERVICE, v);
    }
    if let Ok(v) = HeaderValue::from_str(&signature) {
        h.insert(HDR_SIGNATURE, v);
    }
    response
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}
