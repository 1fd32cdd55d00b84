//! Server registry: CRUD and status transitions over the store.

use std::sync::Arc;

use tracing::{debug, warn};

use sixtun_proto::{httpdate, parse_httpdate};
use sixtun_store::Store;

use crate::error::{BrokerError, BrokerResult};
use crate::keys::{self, ServerIndex, SessionIndex};
use crate::model::{AdminStatus, OperStatus, Server, ServerMeta};

/// Attributes an admin may rewrite after registration.
const SETTABLE_ATTRS: &[&str] = &[
    "alias", "descr", "entity", "location", "access", "tunnel", "tunsrc", "ppprefix", "rtprefix",
];

const SERVER_FIELDS: &[&str] = &[
    "id", "name", "alias", "descr", "admin", "status", "entity", "location", "access", "tunnel",
    "tunsrc", "url", "ppprefix", "rtprefix", "activated",
];

/// Registry of tunnel-endpoint servers.
///
/// Every operation re-reads the store; there is no in-process cache.
/// Multi-step writes are fire-and-forget with no cross-step rollback.
pub struct Registry {
    store: Arc<dyn Store>,
    /// Session slots seeded per new server.
    pool_size: i64,
}

impl Registry {
    pub fn new(store: Arc<dyn Store>, pool_size: i64) -> Self {
        Self { store, pool_size }
    }

    /// Register a new server and seed its session pool.
    ///
    /// The id comes from an atomic counter, so two racing creates can
    /// never share one; the duplicate-name check ahead of the writes is
    /// still a window, which the unique id keeps harmless.
    pub async fn create_server(
        &self,
        name: &str,
        pp_prefix: &str,
        rt_prefix: &str,
        meta: ServerMeta,
    ) -> BrokerResult<i64> {
        if name.is_empty() {
            return Err(BrokerError::Validation("empty server name".to_string()));
        }
        for p in [pp_prefix, rt_prefix] {
            if !p.ends_with("::/48") {
                return Err(BrokerError::Validation(format!("not a ::/48 prefix: {p}")));
            }
        }

        let name_key = keys::server_id_by_name(name);
        if self.store.exists(&name_key).await? {
            return Err(BrokerError::Validation(format!("server {name} exists")));
        }

        let id = self.store.incr(keys::SVID_NEXT).await?;
        let key = keys::server(id);
        if self.store.exists(&key).await? {
            return Err(BrokerError::Validation(format!("server id [{id}] exists")));
        }

        let now = httpdate(chrono::Utc::now());
        let id_str = id.to_string();

        // new servers start disabled and inactive until an admin brings
        // them up
        self.store
            .hset(
                &key,
                &[
                    ("id", &id_str),
                    ("name", name),
                    ("alias", &meta.alias),
                    ("descr", &meta.descr),
                    ("admin", AdminStatus::Disabled.as_str()),
                    ("status", OperStatus::Inactive.as_str()),
                    ("entity", &meta.entity),
                    ("location", &meta.location),
                    ("access", &meta.access),
                    ("tunnel", &meta.tunnel),
                    ("tunsrc", &meta.tunnel_src),
                    ("url", &meta.url),
                    ("ppprefix", pp_prefix),
                    ("rtprefix", rt_prefix),
                    ("activated", &now),
                ],
            )
            .await?;
        self.store.set(&name_key, &id_str).await?;

        self.seed_sessions(id, &now).await?;

        self.store
            .rpush(&keys::server_index(ServerIndex::All), &id_str)
            .await?;
        self.store
            .rpush(&keys::server_index(ServerIndex::Disabled), &id_str)
            .await?;
        self.store
            .rpush(&keys::server_index(ServerIndex::Inactive), &id_str)
            .await?;

        debug!(server = name, id, "tunnel server registered");
        Ok(id)
    }

    async fn seed_sessions(&self, svid: i64, now: &str) -> BrokerResult<()> {
        let all = keys::session_index(svid, SessionIndex::All);
        let unassigned = keys::session_index(svid, SessionIndex::Unassigned);

        for sid in 1..=self.pool_size {
            let sid_str = sid.to_string();
            let idx = format!("{sid:x}");
            self.store
                .hset(
                    &keys::session(svid, sid),
                    &[
                        ("id", &sid_str),
                        ("uid", ""),
                        ("status", OperStatus::Inactive.as_str()),
                        ("type", "6in4"),
                        ("dst", ""),
                        ("idx", &idx),
                        ("lactiont", now),
                    ],
                )
                .await?;
            self.store.rpush(&all, &sid_str).await?;
            self.store.rpush(&unassigned, &sid_str).await?;
        }

        self.store
            .set(&keys::session_id_next(svid), &(self.pool_size + 1).to_string())
            .await?;

        debug!(svid, slots = self.pool_size, "session pool seeded");
        Ok(())
    }

    pub async fn get(&self, id: i64) -> BrokerResult<Server> {
        let key = keys::server(id);
        if !self.store.exists(&key).await? {
            return Err(BrokerError::NotFound(format!("server [{id}]")));
        }

        let v = self.store.hget(&key, SERVER_FIELDS).await?;
        let field = |i: usize| v[i].clone().unwrap_or_default();

        let admin = AdminStatus::parse(&field(4))
            .ok_or_else(|| BrokerError::Validation(format!("corrupt server [{id}] record")))?;
        let oper = OperStatus::parse(&field(5))
            .ok_or_else(|| BrokerError::Validation(format!("corrupt server [{id}] record")))?;
        let activated_at = parse_httpdate(&field(14))
            .map_err(|_| BrokerError::Validation(format!("corrupt server [{id}] record")))?;

        Ok(Server {
            id,
            name: field(1),
            alias: field(2),
            descr: field(3),
            admin,
            oper,
            entity: field(6),
            location: field(7),
            access: field(8),
            tunnel: field(9),
            tunnel_src: field(10),
            url: field(11),
            pp_prefix: field(12),
            rt_prefix: field(13),
            activated_at,
        })
    }

    pub async fn resolve_by_name(&self, name: &str) -> BrokerResult<i64> {
        let id = self
            .store
            .get(&keys::server_id_by_name(name))
            .await?
            .ok_or_else(|| BrokerError::NotFound(format!("server {name}")))?;
        id.parse()
            .map_err(|_| BrokerError::Validation(format!("corrupt id key for server {name}")))
    }

    /// Rewrite one attribute; restricted to the fixed allow-list.
    pub async fn set_attribute(&self, id: i64, field: &str, value: &str) -> BrokerResult<()> {
        if !SETTABLE_ATTRS.contains(&field) {
            return Err(BrokerError::Validation(format!(
                "attribute not permitted: {field}"
            )));
        }

        let key = keys::server(id);
        if !self.store.exists(&key).await? {
            return Err(BrokerError::NotFound(format!("server [{id}]")));
        }

        self.store.hset(&key, &[(field, value)]).await?;
        debug!(id, field, value, "server attribute updated");
        Ok(())
    }

    /// Move the id between the enabled/disabled index pair. Idempotent:
    /// the id is removed from both lists before the single push, so
    /// reapplying leaves exactly one membership.
    pub async fn set_admin_status(&self, id: i64, enabled: bool) -> BrokerResult<()> {
        let key = keys::server(id);
        if !self.store.exists(&key).await? {
            return Err(BrokerError::NotFound(format!("server [{id}]")));
        }

        let status = if enabled {
            AdminStatus::Enabled
        } else {
            AdminStatus::Disabled
        };
        let target = match status {
            AdminStatus::Enabled => ServerIndex::Enabled,
            AdminStatus::Disabled => ServerIndex::Disabled,
        };

        self.store.hset(&key, &[("admin", status.as_str())]).await?;

        let id_str = id.to_string();
        self.store
            .lrem(&keys::server_index(ServerIndex::Enabled), &id_str)
            .await?;
        self.store
            .lrem(&keys::server_index(ServerIndex::Disabled), &id_str)
            .await?;
        self.store
            .rpush(&keys::server_index(target), &id_str)
            .await?;

        debug!(id, status = status.as_str(), "server admin status changed");
        Ok(())
    }

    /// Same shape as [`set_admin_status`], over the active/inactive pair.
    ///
    /// [`set_admin_status`]: Registry::set_admin_status
    pub async fn set_oper_status(&self, id: i64, active: bool) -> BrokerResult<()> {
        let key = keys::server(id);
        if !self.store.exists(&key).await? {
            return Err(BrokerError::NotFound(format!("server [{id}]")));
        }

        let status = if active {
            OperStatus::Active
        } else {
            OperStatus::Inactive
        };
        let target = match status {
            OperStatus::Active => ServerIndex::Active,
            OperStatus::Inactive => ServerIndex::Inactive,
        };

        self.store.hset(&key, &[("status", status.as_str())]).await?;

        let id_str = id.to_string();
        self.store
            .lrem(&keys::server_index(ServerIndex::Active), &id_str)
            .await?;
        self.store
            .lrem(&keys::server_index(ServerIndex::Inactive), &id_str)
            .await?;
        self.store
            .rpush(&keys::server_index(target), &id_str)
            .await?;

        debug!(id, status = status.as_str(), "server oper status changed");
        Ok(())
    }

    /// Ids in the named index, in list order.
    pub async fn list(&self, index: ServerIndex) -> BrokerResult<Vec<i64>> {
        let raw = self
            .store
            .lrange(&keys::server_index(index), 0, -1)
            .await?;
        let mut ids = Vec::with_capacity(raw.len());
        for s in raw {
            match s.parse() {
                Ok(id) => ids.push(id),
                Err(_) => warn!(entry = %s, "skipping unparsable index entry"),
            }
        }
        Ok(ids)
    }

    /// A server must be enabled and active before sessions on it may be
    /// activated or probed.
    pub async fn check_ready(&self, id: i64) -> BrokerResult<Server> {
        let server = self.get(id).await?;
        if server.admin != AdminStatus::Enabled {
            return Err(BrokerError::Validation(format!("server [{id}] is disabled")));
        }
        if server.oper != OperStatus::Active {
            return Err(BrokerError::Validation(format!("server [{id}] is inactive")));
        }
        Ok(server)
    }

    pub async fn is_admin(&self, uid: i64) -> BrokerResult<bool> {
        let admins = self.store.lrange(keys::ADMIN_LIST, 0, -1).await?;
        Ok(admins.iter().any(|a| a == &uid.to_string()))
    }

    /// Idempotent admin-principal seeding, used at startup.
    pub async fn seed_admin(&self, uid: i64) -> BrokerResult<()> {
        if !self.is_admin(uid).await? {
            self.store.rpush(keys::ADMIN_LIST, &uid.to_string()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sixtun_store::MemoryStore;

    fn registry(pool_size: i64) -> Registry {
        Registry::new(Arc::new(MemoryStore::new()), pool_size)
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

    #[tokio::test]
    async fn test_create_assigns_monotonic_ids() {
        let r = registry(4);
        assert_eq!(create(&r, "a.sixtun.net").await, 1);
        assert_eq!(create(&r, "b.sixtun.net").await, 2);
        assert_eq!(r.resolve_by_name("b.sixtun.net").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_name() {
        let r = registry(4);
        create(&r, "a.sixtun.net").await;
        let err = r
            .create_server(
                "a.sixtun.net",
                "2400:3700:90::/48",
                "2400:3700:91::/48",
                ServerMeta::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_prefix() {
        let r = registry(4);
        let err = r
            .create_server(
                "a.sixtun.net",
                "2400:3700:80::/64",
                "2400:3700:81::/48",
                ServerMeta::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_new_server_starts_disabled_inactive() {
        let r = registry(4);
        let id = create(&r, "a.sixtun.net").await;
        let s = r.get(id).await.unwrap();
        assert_eq!(s.admin, AdminStatus::Disabled);
        assert_eq!(s.oper, OperStatus::Inactive);
        assert_eq!(r.list(ServerIndex::All).await.unwrap(), vec![id]);
        assert_eq!(r.list(ServerIndex::Disabled).await.unwrap(), vec![id]);
        assert_eq!(r.list(ServerIndex::Inactive).await.unwrap(), vec![id]);
        assert!(r.list(ServerIndex::Enabled).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enable_is_idempotent() {
        let r = registry(4);
        let id = create(&r, "a.sixtun.net").await;

        r.set_admin_status(id, true).await.unwrap();
        r.set_admin_status(id, true).await.unwrap();

        // exactly one membership, and none left in the paired list
        assert_eq!(r.list(ServerIndex::Enabled).await.unwrap(), vec![id]);
        assert!(r.list(ServerIndex::Disabled).await.unwrap().is_empty());

        let s = r.get(id).await.unwrap();
        assert_eq!(s.admin, AdminStatus::Enabled);
    }

    #[tokio::test]
    async fn test_status_lists_are_exclusive() {
        let r = registry(4);
        let id = create(&r, "a.sixtun.net").await;

        r.set_oper_status(id, true).await.unwrap();
        assert_eq!(r.list(ServerIndex::Active).await.unwrap(), vec![id]);
        assert!(r.list(ServerIndex::Inactive).await.unwrap().is_empty());

        r.set_oper_status(id, false).await.unwrap();
        assert!(r.list(ServerIndex::Active).await.unwrap().is_empty());
        assert_eq!(r.list(ServerIndex::Inactive).await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_set_attribute_allow_list() {
        let r = registry(4);
        let id = create(&r, "a.sixtun.net").await;

        r.set_attribute(id, "alias", "Central Node").await.unwrap();
        assert_eq!(r.get(id).await.unwrap().alias, "Central Node");

        let err = r.set_attribute(id, "admin", "enabled").await.unwrap_err();
        assert!(matches!(err, BrokerError::Validation(_)));

        let err = r.set_attribute(999, "alias", "x").await.unwrap_err();
        assert!(matches!(err, BrokerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_check_ready() {
        let r = registry(4);
        let id = create(&r, "a.sixtun.net").await;

        assert!(matches!(
            r.check_ready(id).await.unwrap_err(),
            BrokerError::Validation(_)
        ));

        r.set_admin_status(id, true).await.unwrap();
        r.set_oper_status(id, true).await.unwrap();
        assert_eq!(r.check_ready(id).await.unwrap().id, id);

        assert!(matches!(
            r.check_ready(999).await.unwrap_err(),
            BrokerError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_admin_seeding_is_idempotent() {
        let r = registry(4);
        r.seed_admin(9000).await.unwrap();
        r.seed_admin(9000).await.unwrap();
        assert!(r.is_admin(9000).await.unwrap());
        assert!(!r.is_admin(9001).await.unwrap());
    }
}
