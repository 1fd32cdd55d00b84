//! Paginated, sortable views over the registry and the session pools.
//!
//! Listing never mutates the store. Entity listings (servers, sessions)
//! sort before slicing; raw listings (activity ring, user ring) keep
//! store order, which is already newest-first for the activity ring.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use sixtun_proto::SortField;
use sixtun_store::Store;

use crate::error::{BrokerError, BrokerResult};
use crate::keys::{self, ServerIndex, SessionIndex};
use crate::model::{Server, Session, SessionAddrs};
use crate::pool::SessionPool;
use crate::registry::Registry;

/// Smallest page size a caller may request.
pub const MIN_PAGE_SIZE: usize = 10;

/// Slice one page out of `items`.
///
/// Pages are 1-based and at least [`MIN_PAGE_SIZE`] wide, enforced here
/// so direct library callers get the same bounds the wire query parser
/// applies. A page size covering the whole collection returns it
/// untouched; a smaller one slices `[(page-1)*size, +size)` clamped to
/// the end, and a page past the end is an error rather than an empty
/// result.
pub fn paginate<T>(items: Vec<T>, page: usize, page_size: usize) -> BrokerResult<Vec<T>> {
    if page == 0 {
        return Err(BrokerError::Validation("invalid list page count".to_string()));
    }
    if page_size < MIN_PAGE_SIZE {
        return Err(BrokerError::Validation(format!(
            "page size below minimum of {MIN_PAGE_SIZE}"
        )));
    }

    let total = items.len();
    if page_size >= total {
        return Ok(items);
    }

    let start = (page - 1) * page_size;
    if start >= total {
        return Err(BrokerError::Validation(format!("no page {page}")));
    }
    let end = (start + page_size).min(total);

    Ok(items
        .into_iter()
        .skip(start)
        .take(end - start)
        .collect())
}

/// One server as presented on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ServerInfo {
    pub id: i64,
    pub name: String,
    pub alias: String,
    pub descr: String,
    pub admin: String,
    pub status: String,
    pub entity: String,
    pub location: String,
    pub access: String,
    pub tunnel: String,
    pub tunnel_src: String,
    pub pp_prefix: String,
    pub rt_prefix: String,
    pub reg_date: i64,
}

impl ServerInfo {
    /// The agent management URL never leaves the broker.
    pub fn from_server(s: &Server) -> ServerInfo {
        ServerInfo {
            id: s.id,
            name: s.name.clone(),
            alias: s.alias.clone(),
            descr: s.descr.clone(),
            admin: s.admin.as_str().to_string(),
            status: s.oper.as_str().to_string(),
            entity: s.entity.clone(),
            location: s.location.clone(),
            access: s.access.clone(),
            tunnel: s.tunnel.clone(),
            tunnel_src: s.tunnel_src.clone(),
            pp_prefix: s.pp_prefix.clone(),
            rt_prefix: s.rt_prefix.clone(),
            reg_date: s.reg_date(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ServerInfoList {
    pub total: usize,
    pub entry: Vec<ServerInfo>,
}

/// One session slot as presented on the wire, addresses derived from
/// the owning server's prefixes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SessionInfo {
    pub id: i64,
    pub user_id: Option<i64>,
    pub status: String,
    pub tunnel: String,
    /// Client IPv4 endpoint while active.
    pub endpoint: String,
    pub src: String,
    pub dst: String,
    pub rt: String,
    pub last_action: String,
}

impl SessionInfo {
    fn from_session(server: &Server, s: &Session) -> BrokerResult<SessionInfo> {
        let addrs = SessionAddrs::derive(&server.pp_prefix, &server.rt_prefix, &s.idx)?;
        Ok(SessionInfo {
            id: s.id,
            user_id: s.owner,
            status: s.oper.as_str().to_string(),
            tunnel: s.tunnel.clone(),
            endpoint: s.dst.clone().unwrap_or_default(),
            src: addrs.src,
            dst: addrs.dst,
            rt: addrs.routed,
            last_action: s.last_action.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SessionInfoList {
    pub server_id: i64,
    pub total: usize,
    pub entry: Vec<SessionInfo>,
}

/// Raw listing page: activity records or user ids, verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct RawList {
    pub server_id: i64,
    pub total: usize,
    pub entry: Vec<String>,
}

/// One of the caller's sessions, with enough server context to act on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct UserSessionInfo {
    pub server_id: i64,
    pub session_id: i64,
    pub status: String,
    pub endpoint: String,
    pub src: String,
    pub dst: String,
    pub rt: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct UserSessionList {
    pub user_id: i64,
    pub entry: Vec<UserSessionInfo>,
}

/// One candidate server from the caller's point of view. A server the
/// caller already holds a slot on carries that session's id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct UserServerInfo {
    pub id: i64,
    pub name: String,
    pub alias: String,
    pub location: String,
    pub session_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct UserServerList {
    pub user_id: i64,
    pub entry: Vec<UserServerInfo>,
}

pub struct Listing {
    store: Arc<dyn Store>,
    registry: Arc<Registry>,
    pool: Arc<SessionPool>,
}

impl Listing {
    pub fn new(store: Arc<dyn Store>, registry: Arc<Registry>, pool: Arc<SessionPool>) -> Self {
        Self {
            store,
            registry,
            pool,
        }
    }

    /// Page over a server index. `Total` counts the whole index, not
    /// the page.
    pub async fn list_servers(
        &self,
        index: ServerIndex,
        page: usize,
        page_size: usize,
        sort: SortField,
    ) -> BrokerResult<ServerInfoList> {
        let ids = self.registry.list(index).await?;
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            // an index entry may outlive its record between two steps
            // of a teardown; skip rather than fail the whole listing
            match self.registry.get(id).await {
                Ok(s) => entries.push(ServerInfo::from_server(&s)),
                Err(BrokerError::NotFound(_)) => warn!(id, "index entry without record"),
                Err(e) => return Err(e),
            }
        }

        sort_servers(&mut entries, sort);
        let total = entries.len();
        let entry = paginate(entries, page, page_size)?;
        Ok(ServerInfoList { total, entry })
    }

    /// Page over one server's session slots.
    pub async fn list_sessions(
        &self,
        svid: i64,
        index: SessionIndex,
        page: usize,
        page_size: usize,
        sort: SortField,
    ) -> BrokerResult<SessionInfoList> {
        let server = self.registry.get(svid).await?;

        let raw = self
            .store
            .lrange(&keys::session_index(svid, index), 0, -1)
            .await?;
        let mut entries = Vec::with_capacity(raw.len());
        for item in raw {
            let sid: i64 = match item.parse() {
                Ok(v) => v,
                Err(_) => {
                    warn!(svid, entry = %item, "skipping unparsable index entry");
                    continue;
                }
            };
            let session = self.pool.get_session(svid, sid).await?;
            entries.push(SessionInfo::from_session(&server, &session)?);
        }

        sort_sessions(&mut entries, sort);
        let total = entries.len();
        let entry = paginate(entries, page, page_size)?;
        Ok(SessionInfoList {
            server_id: svid,
            total,
            entry,
        })
    }

    /// Page over the server's activity ring, newest record first.
    pub async fn list_activity(
        &self,
        svid: i64,
        page: usize,
        page_size: usize,
    ) -> BrokerResult<RawList> {
        self.raw_list(svid, &keys::server_activity(svid), page, page_size)
            .await
    }

    /// Page over the ids of users holding sessions on the server.
    pub async fn list_users(
        &self,
        svid: i64,
        page: usize,
        page_size: usize,
    ) -> BrokerResult<RawList> {
        self.raw_list(svid, &keys::server_users(svid), page, page_size)
            .await
    }

    async fn raw_list(
        &self,
        svid: i64,
        key: &str,
        page: usize,
        page_size: usize,
    ) -> BrokerResult<RawList> {
        if !self.store.exists(&keys::server(svid)).await? {
            return Err(BrokerError::NotFound(format!("server [{svid}]")));
        }

        let items = self.store.lrange(key, 0, -1).await?;
        let total = items.len();
        let entry = paginate(items, page, page_size)?;
        Ok(RawList {
            server_id: svid,
            total,
            entry,
        })
    }

    /// Every session the user holds, across all servers. Unpaginated:
    /// bounded by one session per server.
    pub async fn list_user_sessions(&self, uid: i64) -> BrokerResult<UserSessionList> {
        let mut entry = Vec::new();
        for (svid, sid) in self.pool.user_sessions(uid).await? {
            let server = self.registry.get(svid).await?;
            let session = self.pool.get_session(svid, sid).await?;
            let addrs = SessionAddrs::derive(&server.pp_prefix, &server.rt_prefix, &session.idx)?;
            entry.push(UserSessionInfo {
                server_id: svid,
                session_id: sid,
                status: session.oper.as_str().to_string(),
                endpoint: session.dst.unwrap_or_default(),
                src: addrs.src,
                dst: addrs.dst,
                rt: addrs.routed,
            });
        }
        Ok(UserSessionList { user_id: uid, entry })
    }

    /// Every registered server from the user's point of view, with the
    /// held session id on servers the user already has a slot on.
    pub async fn list_user_servers(&self, uid: i64) -> BrokerResult<UserServerList> {
        let held: std::collections::HashMap<i64, i64> =
            self.pool.user_sessions(uid).await?.into_iter().collect();

        let mut entry = Vec::new();
        for id in self.registry.list(ServerIndex::All).await? {
            let server = match self.registry.get(id).await {
                Ok(s) => s,
                Err(BrokerError::NotFound(_)) => {
                    warn!(id, "index entry without record");
                    continue;
                }
                Err(e) => return Err(e),
            };
            entry.push(UserServerInfo {
                id: server.id,
                name: server.name,
                alias: server.alias,
                location: server.location,
                session_id: held.get(&id).copied(),
            });
        }
        Ok(UserServerList { user_id: uid, entry })
    }
}

fn sort_servers(entries: &mut [ServerInfo], sort: SortField) {
    match sort {
        SortField::Id => entries.sort_by_key(|e| e.id),
        SortField::IdRev => entries.sort_by_key(|e| std::cmp::Reverse(e.id)),
        SortField::Name => entries.sort_by(|a, b| a.name.cmp(&b.name)),
        SortField::NameRev => entries.sort_by(|a, b| b.name.cmp(&a.name)),
        SortField::RegDate => entries.sort_by_key(|e| e.reg_date),
        SortField::RegDateRev => entries.sort_by_key(|e| std::cmp::Reverse(e.reg_date)),
    }
}

/// Sessions have neither names nor registration dates; those orders
/// degrade to the id order of matching direction.
fn sort_sessions(entries: &mut [SessionInfo], sort: SortField) {
    match sort {
        SortField::Id | SortField::Name | SortField::RegDate => entries.sort_by_key(|e| e.id),
        SortField::IdRev | SortField::NameRev | SortField::RegDateRev => {
            entries.sort_by_key(|e| std::cmp::Reverse(e.id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentCtx, AgentDriver, ProbeResult};
    use crate::model::{ServerMeta, Session};
    use async_trait::async_trait;
    use sixtun_store::MemoryStore;

    struct NullAgent;

    #[async_trait]
    impl AgentDriver for NullAgent {
        async fn activate(&self, _: &Server, _: &Session, _: AgentCtx) -> BrokerResult<()> {
            Ok(())
        }
        async fn deactivate(&self, _: &Server, _: &Session, _: AgentCtx) -> BrokerResult<()> {
            Ok(())
        }
        async fn check(
            &self,
            _: &Server,
            _: &Session,
            _: AgentCtx,
        ) -> BrokerResult<Vec<ProbeResult>> {
            Ok(vec![])
        }
        async fn status(&self, _: &Server, _: AgentCtx) -> BrokerResult<String> {
            Ok("{}".to_string())
        }
    }

    fn fixture(pool_size: i64) -> (Arc<Registry>, Arc<SessionPool>, Listing) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let registry = Arc::new(Registry::new(store.clone(), pool_size));
        let pool = Arc::new(SessionPool::new(store.clone(), Arc::new(NullAgent)));
        let listing = Listing::new(store, registry.clone(), pool.clone());
        (registry, pool, listing)
    }

    async fn create(r: &Registry, name: &str) -> i64 {
        r.create_server(
            name,
            "2400:3700:80::/48",
            "2400:3700:81::/48",
            ServerMeta::default(),
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_paginate_full_when_page_covers_all() {
        let items: Vec<i64> = (1..=8).collect();
        assert_eq!(paginate(items.clone(), 1, 10).unwrap(), items);
        // any page number works in whole-collection mode
        assert_eq!(paginate(items.clone(), 5, 10).unwrap(), items);
    }

    #[test]
    fn test_paginate_slices_and_clamps() {
        let items: Vec<i64> = (1..=25).collect();
        assert_eq!(paginate(items.clone(), 1, 10).unwrap(), (1..=10).collect::<Vec<_>>());
        assert_eq!(paginate(items.clone(), 2, 10).unwrap(), (11..=20).collect::<Vec<_>>());
        // last page is short
        assert_eq!(paginate(items.clone(), 3, 10).unwrap(), (21..=25).collect::<Vec<_>>());
        assert!(matches!(
            paginate(items, 4, 10).unwrap_err(),
            BrokerError::Validation(_)
        ));
    }

    #[test]
    fn test_paginate_empty() {
        assert_eq!(paginate(Vec::<i64>::new(), 1, 10).unwrap(), Vec::<i64>::new());
    }

    #[test]
    fn test_paginate_rejects_out_of_bounds_parameters() {
        // page numbering is 1-based; 0 must error, never underflow
        let items: Vec<i64> = (1..=25).collect();
        assert!(matches!(
            paginate(items.clone(), 0, 10).unwrap_err(),
            BrokerError::Validation(_)
        ));
        assert!(matches!(
            paginate(items, 1, 9).unwrap_err(),
            BrokerError::Validation(_)
        ));
        assert!(matches!(
            paginate(Vec::<i64>::new(), 0, 10).unwrap_err(),
            BrokerError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_list_servers_sorted_by_name_reverse() {
        let (registry, _, listing) = fixture(2);
        create(&registry, "a.sixtun.net").await;
        create(&registry, "c.sixtun.net").await;
        create(&registry, "b.sixtun.net").await;

        let l = listing
            .list_servers(ServerIndex::All, 1, 10, SortField::NameRev)
            .await
            .unwrap();
        assert_eq!(l.total, 3);
        let names: Vec<&str> = l.entry.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["c.sixtun.net", "b.sixtun.net", "a.sixtun.net"]);
    }

    #[tokio::test]
    async fn test_list_servers_filters_by_index() {
        let (registry, _, listing) = fixture(2);
        let a = create(&registry, "a.sixtun.net").await;
        create(&registry, "b.sixtun.net").await;
        registry.set_admin_status(a, true).await.unwrap();

        let l = listing
            .list_servers(ServerIndex::Enabled, 1, 10, SortField::Id)
            .await
            .unwrap();
        assert_eq!(l.total, 1);
        assert_eq!(l.entry[0].id, a);

        let l = listing
            .list_servers(ServerIndex::Disabled, 1, 10, SortField::Id)
            .await
            .unwrap();
        assert_eq!(l.total, 1);
        assert_ne!(l.entry[0].id, a);
    }

    #[tokio::test]
    async fn test_list_sessions_derives_addresses() {
        let (registry, pool, listing) = fixture(3);
        let svid = create(&registry, "a.sixtun.net").await;
        pool.assign(7001, svid).await.unwrap();

        let l = listing
            .list_sessions(svid, SessionIndex::Assigned, 1, 10, SortField::Id)
            .await
            .unwrap();
        assert_eq!(l.total, 1);
        let s = &l.entry[0];
        assert_eq!(s.user_id, Some(7001));
        assert_eq!(s.src, "2400:3700:80:1::1");
        assert_eq!(s.dst, "2400:3700:80:1::2");
        assert_eq!(s.rt, "2400:3700:81:1::/64");

        let l = listing
            .list_sessions(svid, SessionIndex::All, 1, 10, SortField::Id)
            .await
            .unwrap();
        assert_eq!(l.total, 3);
        assert_eq!(l.entry[1].user_id, None);
    }

    #[tokio::test]
    async fn test_list_activity_newest_first_pages() {
        let (registry, pool, listing) = fixture(30);
        let svid = create(&registry, "a.sixtun.net").await;
        for uid in 1..=25 {
            pool.assign(uid, svid).await.unwrap();
        }

        let page1 = listing.list_activity(svid, 1, 10).await.unwrap();
        assert_eq!(page1.total, 25);
        assert_eq!(page1.entry.len(), 10);
        // ring is newest first, so the last assignment leads
        assert!(page1.entry[0].starts_with("assignment;25;"));

        let page3 = listing.list_activity(svid, 3, 10).await.unwrap();
        assert_eq!(page3.entry.len(), 5);
        assert!(listing.list_activity(svid, 4, 10).await.is_err());
        assert!(listing.list_activity(999, 1, 10).await.is_err());
    }

    #[tokio::test]
    async fn test_list_users() {
        let (registry, pool, listing) = fixture(4);
        let svid = create(&registry, "a.sixtun.net").await;
        pool.assign(7001, svid).await.unwrap();
        pool.assign(7002, svid).await.unwrap();

        let l = listing.list_users(svid, 1, 10).await.unwrap();
        assert_eq!(l.entry, vec!["7001".to_string(), "7002".to_string()]);
    }

    #[tokio::test]
    async fn test_user_views_span_servers() {
        let (registry, pool, listing) = fixture(2);
        let a = create(&registry, "a.sixtun.net").await;
        let b = create(&registry, "b.sixtun.net").await;
        let c = create(&registry, "c.sixtun.net").await;
        pool.assign(7001, a).await.unwrap();
        pool.assign(7001, b).await.unwrap();
        pool.assign(7002, a).await.unwrap();

        let sessions = listing.list_user_sessions(7001).await.unwrap();
        assert_eq!(sessions.entry.len(), 2);
        assert_eq!(sessions.entry[0].server_id, a);
        assert_eq!(sessions.entry[1].server_id, b);

        // every server shows up; held ones carry their session id
        let servers = listing.list_user_servers(7001).await.unwrap();
        assert_eq!(servers.entry.len(), 3);
        assert_eq!(servers.entry[0].name, "a.sixtun.net");
        assert_eq!(servers.entry[0].session_id, Some(1));
        assert_eq!(servers.entry[1].session_id, Some(1));
        let last = servers.entry.iter().find(|e| e.id == c).unwrap();
        assert_eq!(last.session_id, None);

        let none = listing.list_user_sessions(9999).await.unwrap();
        assert!(none.entry.is_empty());
        let all_free = listing.list_user_servers(9999).await.unwrap();
        assert!(all_free.entry.iter().all(|e| e.session_id.is_none()));
    }
}
