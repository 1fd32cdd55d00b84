//! Server and session records as read from the store.

use chrono::{DateTime, Utc};

use crate::error::{BrokerError, BrokerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminStatus {
    Enabled,
    Disabled,
}

impl AdminStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminStatus::Enabled => "enabled",
            AdminStatus::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Option<AdminStatus> {
        match s {
            "enabled" => Some(AdminStatus::Enabled),
            "disabled" => Some(AdminStatus::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperStatus {
    Active,
    Inactive,
}

impl OperStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperStatus::Active => "active",
            OperStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<OperStatus> {
        match s {
            "active" => Some(OperStatus::Active),
            "inactive" => Some(OperStatus::Inactive),
            _ => None,
        }
    }
}

/// Optional metadata supplied at registration time.
#[derive(Debug, Clone)]
pub struct ServerMeta {
    pub alias: String,
    pub descr: String,
    pub entity: String,
    pub location: String,
    pub access: String,
    pub tunnel: String,
    pub tunnel_src: String,
    /// Management URL of the server's tunnel agent.
    pub url: String,
}

impl Default for ServerMeta {
    fn default() -> Self {
        Self {
            alias: String::new(),
            descr: String::new(),
            entity: String::new(),
            location: String::new(),
            access: "public".to_string(),
            tunnel: "6in4".to_string(),
            tunnel_src: String::new(),
            url: String::new(),
        }
    }
}

/// A tunnel-endpoint server.
#[derive(Debug, Clone)]
pub struct Server {
    pub id: i64,
    pub name: String,
    pub alias: String,
    pub descr: String,
    pub entity: String,
    pub location: String,
    pub access: String,
    pub tunnel: String,
    pub tunnel_src: String,
    pub url: String,
    pub pp_prefix: String,
    pub rt_prefix: String,
    pub admin: AdminStatus,
    pub oper: OperStatus,
    pub activated_at: DateTime<Utc>,
}

impl Server {
    /// Registration date as a unix timestamp, the listing sort key.
    pub fn reg_date(&self) -> i64 {
        self.activated_at.timestamp()
    }
}

/// One allocatable session slot on a server.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: i64,
    /// Assigned user, if any. Never a magic sentinel string.
    pub owner: Option<i64>,
    pub tunnel: String,
    pub oper: OperStatus,
    /// Tunnel destination (the client's IPv4 endpoint) while active.
    pub dst: Option<String>,
    /// Session ordinal in hex, the address-derivation nibble(s).
    pub idx: String,
    pub last_action: String,
}

impl Session {
    /// The numeric session index, decoded from the hex ordinal.
    pub fn index(&self) -> BrokerResult<i64> {
        i64::from_str_radix(&self.idx, 16)
            .map_err(|_| BrokerError::Validation(format!("bad session index: {}", self.idx)))
    }
}

/// Addresses derived from a server's prefixes and a session's ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAddrs {
    /// Server-side inner address (`<pp>:<idx>::1`).
    pub src: String,
    /// Client-side inner address (`<pp>:<idx>::2`).
    pub dst: String,
    /// Routed subnet delegated to the client (`<rt>:<idx>::/64`).
    pub routed: String,
}

impl SessionAddrs {
    /// Both prefixes are /48s written `xxxx:yyyy:zzzz::/48`; the session
    /// hextet slots in after the network portion.
    pub fn derive(pp_prefix: &str, rt_prefix: &str, idx: &str) -> BrokerResult<SessionAddrs> {
        let pp = prefix_network(pp_prefix)?;
        let rt = prefix_network(rt_prefix)?;

        Ok(SessionAddrs {
            src: format!("{pp}:{idx}::1"),
            dst: format!("{pp}:{idx}::2"),
            routed: format!("{rt}:{idx}::/64"),
        })
    }
}

fn prefix_network(prefix: &str) -> BrokerResult<&str> {
    prefix
        .strip_suffix("::/48")
        .ok_or_else(|| BrokerError::Validation(format!("not a ::/48 prefix: {prefix}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_derivation() {
        let a = SessionAddrs::derive("2400:3700:80::/48", "2400:3700:81::/48", "1").unwrap();
        assert_eq!(a.src, "2400:3700:80:1::1");
        assert_eq!(a.dst, "2400:3700:80:1::2");
        assert_eq!(a.routed, "2400:3700:81:1::/64");
    }

    #[test]
    fn test_address_derivation_hex_ordinal() {
        // session 255 -> hextet "ff"
        let a = SessionAddrs::derive("2400:3700:80::/48", "2400:3700:81::/48", "ff").unwrap();
        assert_eq!(a.src, "2400:3700:80:ff::1");
        assert_eq!(a.routed, "2400:3700:81:ff::/64");
    }

    #[test]
    fn test_bad_prefix_rejected() {
        assert!(SessionAddrs::derive("2400:3700:80::/56", "2400:3700:81::/48", "1").is_err());
    }

    #[test]
    fn test_session_index_decoding() {
        let s = Session {
            id: 255,
            owner: None,
            tunnel: "6in4".to_string(),
            oper: OperStatus::Inactive,
            dst: None,
            idx: "ff".to_string(),
            last_action: String::new(),
        };
        assert_eq!(s.index().unwrap(), 255);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(AdminStatus::parse("enabled"), Some(AdminStatus::Enabled));
        assert_eq!(AdminStatus::parse("on"), None);
        assert_eq!(OperStatus::parse("inactive"), Some(OperStatus::Inactive));
    }
}
