//! Per-command handlers.
//!
//! Batch commands report element-wise: one bad entry gets its own
//! `ErrNo` and the rest of the batch still lands. Single-target
//! commands take the first entry of the payload list.

use serde::Serialize;

use sixtun_broker::keys::{self, ServerIndex, SessionIndex};
use sixtun_broker::listing::ServerInfo;
use sixtun_broker::{AgentCtx, BrokerError, BrokerResult, ServerMeta};
use sixtun_proto::{
    Command, ErrNo, IdEntry, IdList, ListQuery, NameEntry, NameList, RequestEnvelope, SortField,
};

use crate::stats::StatsSnapshot;
use crate::AppState;

/// Broker self-status, as returned by `server-status`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StatusReport {
    host_name: String,
    #[serde(flatten)]
    stats: StatsSnapshot,
}

pub async fn execute(
    state: &AppState,
    command: Command,
    req: &RequestEnvelope,
    msg_id: i64,
) -> BrokerResult<String> {
    let ctx = AgentCtx {
        user_id: req.user_id,
        msg_id,
    };

    match command {
        Command::ServerStatus => server_status(state),

        Command::ResolveServer => resolve_server(state, &req.data).await,
        Command::ResolveServerId => resolve_server_id(state, &req.data).await,
        Command::AddServer => add_server(state, &req.data).await,
        Command::SetServerAttr => set_server_attr(state, &req.data).await,
        Command::EnableServer => set_admin_status(state, &req.data, true).await,
        Command::DisableServer => set_admin_status(state, &req.data, false).await,
        Command::ActivateServer => set_oper_status(state, &req.data, true).await,
        Command::DeactivateServer => set_oper_status(state, &req.data, false).await,
        Command::ListServer => list_server(state, &req.data).await,
        Command::GetServerList => get_server_list(state, &req.data).await,
        Command::TunnelServerStatus => tunnel_server_status(state, &req.data, ctx).await,
        Command::ServerInfo => server_info(state, &req.data).await,

        Command::AssignSession => assign_session(state, &req.data, req.user_id).await,
        Command::ReassignSession => reassign_session(state, &req.data, req.user_id).await,
        Command::ActivateSession => activate_session(state, &req.data, req.user_id, ctx).await,
        Command::DeactivateSession => deactivate_session(state, &req.data, req.user_id, ctx).await,
        Command::CheckSession => check_session(state, &req.data, req.user_id, ctx).await,
        Command::ListUserSessions => list_user_sessions(state, req.user_id).await,
        Command::ListUserServers => list_user_servers(state, req.user_id).await,
    }
}

fn to_json<T: Serialize>(value: &T) -> BrokerResult<String> {
    serde_json::to_string(value).map_err(|e| BrokerError::Validation(e.to_string()))
}

fn parse_name_list(data: &str) -> BrokerResult<NameList> {
    let list: NameList = serde_json::from_str(data)
        .map_err(|_| BrokerError::Validation("invalid request data".to_string()))?;
    if list.entry.is_empty() {
        return Err(BrokerError::Validation("empty batch".to_string()));
    }
    Ok(list)
}

fn parse_id_list(data: &str) -> BrokerResult<IdList> {
    let list: IdList = serde_json::from_str(data)
        .map_err(|_| BrokerError::Validation("invalid request data".to_string()))?;
    if list.entry.is_empty() {
        return Err(BrokerError::Validation("empty batch".to_string()));
    }
    Ok(list)
}

fn errno_of(result: &BrokerResult<()>) -> ErrNo {
    match result {
        Ok(()) => ErrNo::Ok,
        Err(e) => e.errno(),
    }
}

fn server_status(state: &AppState) -> BrokerResult<String> {
    to_json(&StatusReport {
        host_name: state.host_name.clone(),
        stats: state.stats.snapshot(state.started_at),
    })
}

async fn resolve_server(state: &AppState, data: &str) -> BrokerResult<String> {
    let list = parse_name_list(data)?;
    let mut out = Vec::with_capacity(list.entry.len());
    for e in &list.entry {
        let (err_no, opt) = match state.registry.resolve_by_name(&e.name).await {
            Ok(id) => (ErrNo::Ok, id.to_string()),
            Err(err) => (err.errno(), String::new()),
        };
        out.push(NameEntry {
            name: e.name.clone(),
            err_no,
            opt,
        });
    }
    to_json(&NameList { id: 0, entry: out })
}

async fn resolve_server_id(state: &AppState, data: &str) -> BrokerResult<String> {
    let list = parse_id_list(data)?;
    let mut out = Vec::with_capacity(list.entry.len());
    for e in &list.entry {
        let (err_no, opt) = match state.registry.get(e.id).await {
            Ok(s) => (ErrNo::Ok, s.name),
            Err(err) => (err.errno(), String::new()),
        };
        out.push(IdEntry {
            id: e.id,
            err_no,
            opt,
        });
    }
    to_json(&IdList { id: 0, entry: out })
}

/// Each entry registers one server: `Name` is the server name, `Opt`
/// packs `ppPrefix;rtPrefix[;agentUrl]`.
async fn add_server(state: &AppState, data: &str) -> BrokerResult<String> {
    let list = parse_name_list(data)?;
    let mut out = Vec::with_capacity(list.entry.len());
    for e in &list.entry {
        let result = async {
            let mut parts = e.opt.split(';');
            let pp = parts.next().unwrap_or_default();
            let rt = parts.next().ok_or_else(|| {
                BrokerError::Validation("expected ppPrefix;rtPrefix[;agentUrl]".to_string())
            })?;
            let meta = ServerMeta {
                url: parts.next().unwrap_or_default().to_string(),
                ..ServerMeta::default()
            };
            state.registry.create_server(&e.name, pp, rt, meta).await
        }
        .await;

        let (err_no, opt) = match result {
            Ok(id) => (ErrNo::Ok, id.to_string()),
            Err(err) => (err.errno(), String::new()),
        };
        out.push(NameEntry {
            name: e.name.clone(),
            err_no,
            opt,
        });
    }
    to_json(&NameList { id: 0, entry: out })
}

/// Each entry rewrites one attribute: `Opt` packs `attr;value`.
async fn set_server_attr(state: &AppState, data: &str) -> BrokerResult<String> {
    let list = parse_id_list(data)?;
    let mut out = Vec::with_capacity(list.entry.len());
    for e in &list.entry {
        let result = match e.opt.split_once(';') {
            Some((attr, value)) => state.registry.set_attribute(e.id, attr, value).await,
            None => Err(BrokerError::Validation("expected attr;value".to_string())),
        };
        out.push(IdEntry {
            id: e.id,
            err_no: errno_of(&result),
            opt: String::new(),
        });
    }
    to_json(&IdList { id: 0, entry: out })
}

async fn set_admin_status(state: &AppState, data: &str, enabled: bool) -> BrokerResult<String> {
    let list = parse_id_list(data)?;
    let mut out = Vec::with_capacity(list.entry.len());
    for e in &list.entry {
        let result = state.registry.set_admin_status(e.id, enabled).await;
        out.push(IdEntry {
            id: e.id,
            err_no: errno_of(&result),
            opt: String::new(),
        });
    }
    to_json(&IdList { id: 0, entry: out })
}

async fn set_oper_status(state: &AppState, data: &str, active: bool) -> BrokerResult<String> {
    let list = parse_id_list(data)?;
    let mut out = Vec::with_capacity(list.entry.len());
    for e in &list.entry {
        let result = state.registry.set_oper_status(e.id, active).await;
        out.push(IdEntry {
            id: e.id,
            err_no: errno_of(&result),
            opt: String::new(),
        });
    }
    to_json(&IdList { id: 0, entry: out })
}

/// Paginated server listing; the first entry's `Opt` carries the
/// `list:page:pageSize:sortField` query.
async fn list_server(state: &AppState, data: &str) -> BrokerResult<String> {
    let list = parse_id_list(data)?;
    let q = parse_query(&list.entry[0].opt)?;
    let sort = entity_sort(&q)?;
    let index = ServerIndex::parse(&q.list)
        .ok_or_else(|| BrokerError::Validation(format!("unknown server list: {}", q.list)))?;

    let result = state
        .listing
        .list_servers(index, q.page, q.page_size, sort)
        .await?;
    to_json(&result)
}

/// Per-server listings: session indexes with a sort field, or the raw
/// activity and user rings with an empty one.
async fn get_server_list(state: &AppState, data: &str) -> BrokerResult<String> {
    let list = parse_id_list(data)?;
    let svid = list.entry[0].id;
    let q = parse_query(&list.entry[0].opt)?;

    match q.sort {
        Some(sort) => {
            let index = SessionIndex::parse(&q.list).ok_or_else(|| {
                BrokerError::Validation(format!("unknown session list: {}", q.list))
            })?;
            let result = state
                .listing
                .list_sessions(svid, index, q.page, q.page_size, sort)
                .await?;
            to_json(&result)
        }
        None => match q.list.as_str() {
            "session-activity" => {
                to_json(&state.listing.list_activity(svid, q.page, q.page_size).await?)
            }
            "all-users" => to_json(&state.listing.list_users(svid, q.page, q.page_size).await?),
            other => Err(BrokerError::Validation(format!("unknown raw list: {other}"))),
        },
    }
}

async fn tunnel_server_status(state: &AppState, data: &str, ctx: AgentCtx) -> BrokerResult<String> {
    let list = parse_id_list(data)?;
    let server = state.registry.get(list.entry[0].id).await?;
    state.agent.status(&server, ctx).await
}

/// One server with its prefixes and slot occupancy.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ServerDetail {
    #[serde(flatten)]
    info: ServerInfo,
    sessions: usize,
    assigned: usize,
    active: usize,
}

async fn server_info(state: &AppState, data: &str) -> BrokerResult<String> {
    let list = parse_id_list(data)?;
    let svid = list.entry[0].id;
    let server = state.registry.get(svid).await?;

    let count = |index| {
        let key = keys::session_index(svid, index);
        async move { state.store.llen(&key).await }
    };
    to_json(&ServerDetail {
        info: ServerInfo::from_server(&server),
        sessions: count(SessionIndex::All).await?,
        assigned: count(SessionIndex::Assigned).await?,
        active: count(SessionIndex::Active).await?,
    })
}

async fn assign_session(state: &AppState, data: &str, uid: i64) -> BrokerResult<String> {
    let list = parse_id_list(data)?;
    let svid = list.entry[0].id;
    let sid = state.pool.assign(uid, svid).await?;
    to_json(&IdList {
        id: svid,
        entry: vec![IdEntry {
            id: sid,
            err_no: ErrNo::Ok,
            opt: String::new(),
        }],
    })
}

async fn reassign_session(state: &AppState, data: &str, uid: i64) -> BrokerResult<String> {
    let list = parse_id_list(data)?;
    let svid = list.entry[0].id;
    let sid = state.pool.unassign(uid, svid).await?;
    to_json(&IdList {
        id: svid,
        entry: vec![IdEntry {
            id: sid,
            err_no: ErrNo::Ok,
            opt: String::new(),
        }],
    })
}

/// `Opt` carries the client's IPv4 tunnel endpoint.
async fn activate_session(
    state: &AppState,
    data: &str,
    uid: i64,
    ctx: AgentCtx,
) -> BrokerResult<String> {
    let list = parse_id_list(data)?;
    let svid = list.entry[0].id;

    let server = state.registry.check_ready(svid).await?;
    let sid = state
        .pool
        .find_user_session(uid, svid)
        .await?
        .ok_or(BrokerError::NotAssigned(uid, svid))?;

    state
        .pool
        .activate(&server, sid, uid, &list.entry[0].opt, ctx)
        .await?;
    to_json(&IdList {
        id: svid,
        entry: vec![IdEntry {
            id: sid,
            err_no: ErrNo::Ok,
            opt: String::new(),
        }],
    })
}

async fn deactivate_session(
    state: &AppState,
    data: &str,
    uid: i64,
    ctx: AgentCtx,
) -> BrokerResult<String> {
    let list = parse_id_list(data)?;
    let svid = list.entry[0].id;

    let server = state.registry.check_ready(svid).await?;
    let sid = state
        .pool
        .find_user_session(uid, svid)
        .await?
        .ok_or(BrokerError::NotAssigned(uid, svid))?;

    state.pool.deactivate(&server, sid, uid, ctx).await?;
    to_json(&IdList {
        id: svid,
        entry: vec![IdEntry {
            id: sid,
            err_no: ErrNo::Ok,
            opt: String::new(),
        }],
    })
}

/// Probe the caller's session. Each result entry carries the probed
/// address in `Opt` and the round trip in microseconds in `Id`; an
/// unreachable target is marked with `ErrNo` 2.
async fn check_session(
    state: &AppState,
    data: &str,
    uid: i64,
    ctx: AgentCtx,
) -> BrokerResult<String> {
    let list = parse_id_list(data)?;
    let svid = list.entry[0].id;

    let server = state.registry.check_ready(svid).await?;
    let sid = state
        .pool
        .find_user_session(uid, svid)
        .await?
        .ok_or(BrokerError::NotAssigned(uid, svid))?;

    let probes = state.pool.check(&server, sid, ctx).await?;
    let entry = probes
        .into_iter()
        .map(|p| IdEntry {
            id: p.rtt.map(|d| d.as_micros() as i64).unwrap_or(0),
            err_no: if p.rtt.is_some() {
                ErrNo::Ok
            } else {
                ErrNo::Again
            },
            opt: p.target,
        })
        .collect();
    to_json(&IdList { id: svid, entry })
}

async fn list_user_sessions(state: &AppState, uid: i64) -> BrokerResult<String> {
    to_json(&state.listing.list_user_sessions(uid).await?)
}

async fn list_user_servers(state: &AppState, uid: i64) -> BrokerResult<String> {
    to_json(&state.listing.list_user_servers(uid).await?)
}

fn parse_query(opt: &str) -> BrokerResult<ListQuery> {
    ListQuery::parse(opt).map_err(|e| BrokerError::Validation(e.to_string()))
}

fn entity_sort(q: &ListQuery) -> BrokerResult<SortField> {
    q.sort
        .ok_or_else(|| BrokerError::Validation("missing sort field".to_string()))
}
