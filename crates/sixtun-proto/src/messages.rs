//! Envelope and payload types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// In-band result codes carried in every response and batch entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum ErrNo {
    #[default]
    Ok = 0,
    Invalid = 1,
    Again = 2,
    NotFound = 3,
    Forbidden = 4,
}

impl From<ErrNo> for i64 {
    fn from(e: ErrNo) -> i64 {
        e as i64
    }
}

impl TryFrom<i64> for ErrNo {
    type Error = String;

    fn try_from(v: i64) -> Result<Self, String> {
        match v {
            0 => Ok(ErrNo::Ok),
            1 => Ok(ErrNo::Invalid),
            2 => Ok(ErrNo::Again),
            3 => Ok(ErrNo::NotFound),
            4 => Ok(ErrNo::Forbidden),
            _ => Err(format!("unknown error code {v}")),
        }
    }
}

/// Request envelope. `data` is itself JSON: a [`NameList`] or [`IdList`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct RequestEnvelope {
    pub user_id: i64,
    pub command: String,
    pub data: String,
}

/// Response envelope mirrored back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseEnvelope {
    pub host_name: String,
    pub user_id: i64,
    pub msg_id: i64,
    pub err_no: ErrNo,
    pub data: String,
}

/// One name-keyed batch entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct NameEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub err_no: ErrNo,
    #[serde(default)]
    pub opt: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct NameList {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub entry: Vec<NameEntry>,
}

/// One id-keyed batch entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct IdEntry {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub err_no: ErrNo,
    #[serde(default)]
    pub opt: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct IdList {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub entry: Vec<IdEntry>,
}

/// Request sent to a tunnel-endpoint agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct AgentRequest {
    pub id: i64,
    pub user_id: i64,
    pub msg_id: i64,
    pub command: String,
    #[serde(default)]
    pub data: String,
}

/// Response from a tunnel-endpoint agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct AgentResponse {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub msg_id: i64,
    #[serde(default)]
    pub err_no: ErrNo,
    #[serde(default)]
    pub data: String,
}

/// The closed command set. Dispatch matches on this exhaustively; the
/// string forms double as the wire allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    // broker self-status
    ServerStatus,

    // server registry (admin scope)
    ResolveServer,
    ResolveServerId,
    AddServer,
    SetServerAttr,
    EnableServer,
    DisableServer,
    ActivateServer,
    DeactivateServer,
    ListServer,
    GetServerList,
    TunnelServerStatus,
    ServerInfo,

    // session pool
    AssignSession,
    ReassignSession,
    ActivateSession,
    DeactivateSession,
    CheckSession,
    ListUserSessions,
    ListUserServers,
}

impl Command {
    pub fn parse(s: &str) -> Option<Command> {
        Some(match s {
            "server-status" => Command::ServerStatus,
            "resolve-server" => Command::ResolveServer,
            "resolve-server-id" => Command::ResolveServerId,
            "add-server" => Command::AddServer,
            "set-server-attr" => Command::SetServerAttr,
            "enable-server" => Command::EnableServer,
            "disable-server" => Command::DisableServer,
            "activate-server" => Command::ActivateServer,
            "deactivate-server" => Command::DeactivateServer,
            "list-server" => Command::ListServer,
            "get-server-list" => Command::GetServerList,
            "tunnel-server-status" => Command::TunnelServerStatus,
            "server-info" => Command::ServerInfo,
            "assign-session" => Command::AssignSession,
            "reassign-session" => Command::ReassignSession,
            "activate-session" => Command::ActivateSession,
            "deactivate-session" => Command::DeactivateSession,
            "check-session" => Command::CheckSession,
            "list-user-sessions" => Command::ListUserSessions,
            "list-user-servers" => Command::ListUserServers,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::ServerStatus => "server-status",
            Command::ResolveServer => "resolve-server",
            Command::ResolveServerId => "resolve-server-id",
            Command::AddServer => "add-server",
            Command::SetServerAttr => "set-server-attr",
            Command::EnableServer => "enable-server",
            Command::DisableServer => "disable-server",
            Command::ActivateServer => "activate-server",
            Command::DeactivateServer => "deactivate-server",
            Command::ListServer => "list-server",
            Command::GetServerList => "get-server-list",
            Command::TunnelServerStatus => "tunnel-server-status",
            Command::ServerInfo => "server-info",
            Command::AssignSession => "assign-session",
            Command::ReassignSession => "reassign-session",
            Command::ActivateSession => "activate-session",
            Command::DeactivateSession => "deactivate-session",
            Command::CheckSession => "check-session",
            Command::ListUserSessions => "list-user-sessions",
            Command::ListUserServers => "list-user-servers",
        }
    }

    /// Commands served under `/v/`, restricted to admin principals.
    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            Command::ResolveServer
                | Command::ResolveServerId
                | Command::AddServer
                | Command::SetServerAttr
                | Command::EnableServer
                | Command::DisableServer
                | Command::ActivateServer
                | Command::DeactivateServer
                | Command::ListServer
                | Command::GetServerList
                | Command::TunnelServerStatus
                | Command::ServerInfo
        )
    }

    /// Commands served under `/s/`.
    pub fn is_session(&self) -> bool {
        matches!(
            self,
            Command::AssignSession
                | Command::ReassignSession
                | Command::ActivateSession
                | Command::DeactivateSession
                | Command::CheckSession
                | Command::ListUserSessions
                | Command::ListUserServers
        )
    }
}

/// Sort orders accepted by entity listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Id,
    IdRev,
    Name,
    NameRev,
    RegDate,
    RegDateRev,
}

impl SortField {
    pub fn parse(s: &str) -> Option<SortField> {
        Some(match s {
            "id" => SortField::Id,
            "id-r" => SortField::IdRev,
            "name" => SortField::Name,
            "name-r" => SortField::NameRev,
            "rdate" => SortField::RegDate,
            "rdate-r" => SortField::RegDateRev,
            _ => return None,
        })
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ListQueryError {
    #[error("invalid list parameter count")]
    TokenCount,
    #[error("invalid list page count")]
    PageRange,
    #[error("invalid sort field: {0}")]
    Sort(String),
}

/// Parsed `list:page:pageSize:sortField` query from a batch entry's `Opt`.
///
/// Entity listings carry four tokens with a sort field; raw listings
/// (activity, user rings) leave the sort token empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub list: String,
    pub page: usize,
    pub page_size: usize,
    pub sort: Option<SortField>,
}

impl ListQuery {
    pub fn parse(opt: &str) -> Result<ListQuery, ListQueryError> {
        let tok: Vec<&str> = opt.split(':').collect();
        if tok.len() != 4 {
            return Err(ListQueryError::TokenCount);
        }

        let page: usize = tok[1].parse().map_err(|_| ListQueryError::PageRange)?;
        let page_size: usize = tok[2].parse().map_err(|_| ListQueryError::PageRange)?;

        if page == 0 || page_size < 10 {
            return Err(ListQueryError::PageRange);
        }

        let sort = if tok[3].is_empty() {
            None
        } else {
            Some(SortField::parse(tok[3]).ok_or_else(|| ListQueryError::Sort(tok[3].to_string()))?)
        };

        Ok(ListQuery {
            list: tok[0].to_string(),
            page,
            page_size,
            sort,
        })
    }
}
