//! Store key layout.
//!
//! ```text
//! svid:next                                server id counter
//! server:{name}:id                         name -> id
//! server:{all|enabled|disabled|active|inactive}-list
//! svid:{id}                                server hash
//! svid:{id}:sid:next                       per-server session counter
//! svid:{id}:sid:{sid}                      session hash
//! svid:{id}:{all|assigned|unassigned|active}-sessions-list
//! svid:{id}:all-users-list
//! svid:{id}:session-activity-list          bounded ring, newest first
//! uid:{uid}:sessions-list                  "{svid}:{sid}" pairs
//! user:admin-list
//! msgid:next                               response correlation counter
//! ```

pub const SVID_NEXT: &str = "svid:next";
pub const MSGID_NEXT: &str = "msgid:next";
pub const ADMIN_LIST: &str = "user:admin-list";

/// Server index lists, paired: an id is in exactly one of
/// {enabled, disabled} and exactly one of {active, inactive}.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerIndex {
    All,
    Enabled,
    Disabled,
    Active,
    Inactive,
}

impl ServerIndex {
    pub fn parse(s: &str) -> Option<ServerIndex> {
        Some(match s {
            "all" => ServerIndex::All,
            "enabled" => ServerIndex::Enabled,
            "disabled" => ServerIndex::Disabled,
            "active" => ServerIndex::Active,
            "inactive" => ServerIndex::Inactive,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerIndex::All => "all",
            ServerIndex::Enabled => "enabled",
            ServerIndex::Disabled => "disabled",
            ServerIndex::Active => "active",
            ServerIndex::Inactive => "inactive",
        }
    }
}

/// Per-server session index lists. A slot is in exactly one of
/// {assigned, unassigned}, and in active iff its status is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionIndex {
    All,
    Assigned,
    Unassigned,
    Active,
}

impl SessionIndex {
    pub fn parse(s: &str) -> Option<SessionIndex> {
        Some(match s {
            "all-sessions" => SessionIndex::All,
            "assigned-sessions" => SessionIndex::Assigned,
            "unassigned-sessions" => SessionIndex::Unassigned,
            "active-sessions" => SessionIndex::Active,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionIndex::All => "all-sessions",
            SessionIndex::Assigned => "assigned-sessions",
            SessionIndex::Unassigned => "unassigned-sessions",
            SessionIndex::Active => "active-sessions",
        }
    }
}

pub fn server_id_by_name(name: &str) -> String {
    format!("server:{name}:id")
}

pub fn server_index(index: ServerIndex) -> String {
    format!("server:{}-list", index.as_str())
}

pub fn server(id: i64) -> String {
    format!("svid:{id}")
}

pub fn session_id_next(svid: i64) -> String {
    format!("svid:{svid}:sid:next")
}

pub fn session(svid: i64, sid: i64) -> String {
    format!("svid:{svid}:sid:{sid}")
}

pub fn session_index(svid: i64, index: SessionIndex) -> String {
    format!("svid:{svid}:{}-list", index.as_str())
}

pub fn server_users(svid: i64) -> String {
    format!("svid:{svid}:all-users-list")
}

pub fn server_activity(svid: i64) -> String {
    format!("svid:{svid}:session-activity-list")
}

pub fn user_sessions(uid: i64) -> String {
    format!("uid:{uid}:sessions-list")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shapes() {
        assert_eq!(server_id_by_name("sg1.sixtun.net"), "server:sg1.sixtun.net:id");
        assert_eq!(server_index(ServerIndex::Enabled), "server:enabled-list");
        assert_eq!(server(7), "svid:7");
        assert_eq!(session(7, 3), "svid:7:sid:3");
        assert_eq!(
            session_index(7, SessionIndex::Unassigned),
            "svid:7:unassigned-sessions-list"
        );
        assert_eq!(user_sessions(7001), "uid:7001:sessions-list");
    }

    #[test]
    fn test_index_parse() {
        assert_eq!(ServerIndex::parse("disabled"), Some(ServerIndex::Disabled));
        assert_eq!(ServerIndex::parse("borked"), None);
        assert_eq!(
            SessionIndex::parse("unassigned-sessions"),
            Some(SessionIndex::Unassigned)
        );
        assert_eq!(SessionIndex::parse("sessions"), None);
    }
}
