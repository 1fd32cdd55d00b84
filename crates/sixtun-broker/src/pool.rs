//! Session pool: per-server slot assignment and tunnel lifecycle.
//!
//! Slots are pre-seeded at server registration and never destroyed;
//! unassignment returns a slot to the tail of the free list for FIFO
//! reuse. The store only guarantees per-command atomicity, so every
//! multi-step mutation here runs under a per-server advisory lock.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use sixtun_proto::httpdate;
use sixtun_store::Store;

use crate::agent::{AgentCtx, AgentDriver, ProbeResult};
use crate::error::{BrokerError, BrokerResult};
use crate::keys::{self, SessionIndex};
use crate::model::{OperStatus, Server, Session};

/// Activity ring bound per server.
const ACTIVITY_MAX: usize = 1000;

const SESSION_FIELDS: &[&str] = &["id", "uid", "status", "type", "dst", "idx", "lactiont"];

pub struct SessionPool {
    store: Arc<dyn Store>,
    agent: Arc<dyn AgentDriver>,
    /// Advisory locks keyed by server id, serializing the multi-step
    /// assign/unassign sequences that the store cannot make atomic.
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl SessionPool {
    pub fn new(store: Arc<dyn Store>, agent: Arc<dyn AgentDriver>) -> Self {
        Self {
            store,
            agent,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn server_lock(&self, svid: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(svid).or_default().clone()
    }

    /// The user's session on `svid`, if one is recorded.
    pub async fn find_user_session(&self, uid: i64, svid: i64) -> BrokerResult<Option<i64>> {
        for (v, s) in self.user_sessions(uid).await? {
            if v == svid {
                return Ok(Some(s));
            }
        }
        Ok(None)
    }

    /// All `(server, session)` pairs recorded for the user.
    pub async fn user_sessions(&self, uid: i64) -> BrokerResult<Vec<(i64, i64)>> {
        let raw = self
            .store
            .lrange(&keys::user_sessions(uid), 0, -1)
            .await?;
        let mut pairs = Vec::with_capacity(raw.len());
        for item in raw {
            match parse_pair(&item) {
                Some(p) => pairs.push(p),
                None => warn!(uid, entry = %item, "skipping malformed session pair"),
            }
        }
        Ok(pairs)
    }

    /// Take the next free slot on `svid` for `uid`.
    ///
    /// Head-of-list pop gives deterministic, fair slot reuse; there is
    /// no other priority. One session per user per server.
    pub async fn assign(&self, uid: i64, svid: i64) -> BrokerResult<i64> {
        let lock = self.server_lock(svid).await;
        let _guard = lock.lock().await;

        if !self.store.exists(&keys::server(svid)).await? {
            return Err(BrokerError::NotFound(format!("server [{svid}]")));
        }
        if self.find_user_session(uid, svid).await?.is_some() {
            return Err(BrokerError::AlreadyAssigned(uid, svid));
        }

        let unassigned = keys::session_index(svid, SessionIndex::Unassigned);
        let sid: i64 = self
            .store
            .lpop(&unassigned)
            .await?
            .ok_or(BrokerError::PoolExhausted(svid))?
            .parse()
            .map_err(|_| BrokerError::Validation(format!("corrupt free list on [{svid}]")))?;

        let key = keys::session(svid, sid);
        if !self.store.exists(&key).await? {
            return Err(BrokerError::NotFound(format!("session [{svid}:{sid}]")));
        }

        self.store.hset(&key, &[("uid", &uid.to_string())]).await?;

        let pair = format!("{svid}:{sid}");
        let user_list = keys::user_sessions(uid);
        let users = keys::server_users(svid);
        let assigned = keys::session_index(svid, SessionIndex::Assigned);
        let sid_str = sid.to_string();
        let uid_str = uid.to_string();

        self.store.lrem(&user_list, &pair).await?;
        self.store.lrem(&users, &uid_str).await?;
        self.store.lrem(&assigned, &sid_str).await?;
        self.store.rpush(&user_list, &pair).await?;
        self.store.rpush(&users, &uid_str).await?;
        self.store.rpush(&assigned, &sid_str).await?;

        self.log_activity(svid, uid, sid, "assignment").await;

        debug!(svid, sid, uid, "session assigned");
        Ok(sid)
    }

    /// Return the user's slot on `svid` to the free pool.
    pub async fn unassign(&self, uid: i64, svid: i64) -> BrokerResult<i64> {
        let lock = self.server_lock(svid).await;
        let _guard = lock.lock().await;

        let sid = self
            .find_user_session(uid, svid)
            .await?
            .ok_or(BrokerError::NotAssigned(uid, svid))?;

        let key = keys::session(svid, sid);
        if !self.store.exists(&key).await? {
            return Err(BrokerError::NotFound(format!("session [{svid}:{sid}]")));
        }

        self.store.hset(&key, &[("uid", "")]).await?;

        let pair = format!("{svid}:{sid}");
        let unassigned = keys::session_index(svid, SessionIndex::Unassigned);
        let sid_str = sid.to_string();

        self.store.lrem(&keys::user_sessions(uid), &pair).await?;
        self.store
            .lrem(&keys::server_users(svid), &uid.to_string())
            .await?;
        self.store
            .lrem(&keys::session_index(svid, SessionIndex::Assigned), &sid_str)
            .await?;
        self.store.lrem(&unassigned, &sid_str).await?;
        self.store.rpush(&unassigned, &sid_str).await?;

        self.log_activity(svid, uid, sid, "reassignment").await;

        debug!(svid, sid, uid, "session returned to pool");
        Ok(sid)
    }

    pub async fn get_session(&self, svid: i64, sid: i64) -> BrokerResult<Session> {
        let key = keys::session(svid, sid);
        if !self.store.exists(&key).await? {
            return Err(BrokerError::NotFound(format!("session [{svid}:{sid}]")));
        }

        let v = self.store.hget(&key, SESSION_FIELDS).await?;
        let field = |i: usize| v[i].clone().unwrap_or_default();

        let owner = match field(1).as_str() {
            "" => None,
            s => Some(s.parse().map_err(|_| {
                BrokerError::Validation(format!("corrupt session [{svid}:{sid}] record"))
            })?),
        };
        let oper = OperStatus::parse(&field(2)).ok_or_else(|| {
            BrokerError::Validation(format!("corrupt session [{svid}:{sid}] record"))
        })?;
        let dst = match field(4).as_str() {
            "" => None,
            s => Some(s.to_string()),
        };

        Ok(Session {
            id: sid,
            owner,
            oper,
            tunnel: field(3),
            dst,
            idx: field(5),
            last_action: field(6),
        })
    }

    /// Mark the session active and stand the tunnel up on the agent.
    ///
    /// The agent call comes after the local writes and is never rolled
    /// back on failure: the caller sees the upstream error and local
    /// and remote state may diverge until the next lifecycle action.
    pub async fn activate(
        &self,
        server: &Server,
        sid: i64,
        uid: i64,
        dst: &str,
        ctx: AgentCtx,
    ) -> BrokerResult<()> {
        dst.parse::<Ipv4Addr>()
            .map_err(|_| BrokerError::Validation(format!("invalid IPv4 address: {dst}")))?;

        let session = {
            let lock = self.server_lock(server.id).await;
            let _guard = lock.lock().await;

            let key = keys::session(server.id, sid);
            if !self.store.exists(&key).await? {
                return Err(BrokerError::NotFound(format!("session [{}:{sid}]", server.id)));
            }

            self.store
                .hset(&key, &[("dst", dst), ("status", OperStatus::Active.as_str())])
                .await?;

            // dedup-insert
            let active = keys::session_index(server.id, SessionIndex::Active);
            let sid_str = sid.to_string();
            self.store.lrem(&active, &sid_str).await?;
            self.store.rpush(&active, &sid_str).await?;

            self.log_activity(server.id, uid, sid, "activation").await;

            self.get_session(server.id, sid).await?
        };

        // the agent call runs outside the lock; it can take the whole
        // freshness window
        self.agent.activate(server, &session, ctx).await?;

        debug!(svid = server.id, sid, dst, "session activated");
        Ok(())
    }

    /// Mirror image of [`activate`].
    ///
    /// [`activate`]: SessionPool::activate
    pub async fn deactivate(
        &self,
        server: &Server,
        sid: i64,
        uid: i64,
        ctx: AgentCtx,
    ) -> BrokerResult<()> {
        let session = {
            let lock = self.server_lock(server.id).await;
            let _guard = lock.lock().await;

            // capture the destination before it is cleared; the agent
            // still needs it to tear the tunnel down
            let session = self.get_session(server.id, sid).await?;

            let key = keys::session(server.id, sid);
            self.store
                .hset(&key, &[("dst", ""), ("status", OperStatus::Inactive.as_str())])
                .await?;
            self.store
                .lrem(
                    &keys::session_index(server.id, SessionIndex::Active),
                    &sid.to_string(),
                )
                .await?;

            self.log_activity(server.id, uid, sid, "deactivation").await;
            session
        };

        self.agent.deactivate(server, &session, ctx).await?;

        debug!(svid = server.id, sid, "session deactivated");
        Ok(())
    }

    /// Probe the session's endpoints. Mutates nothing.
    pub async fn check(
        &self,
        server: &Server,
        sid: i64,
        ctx: AgentCtx,
    ) -> BrokerResult<Vec<ProbeResult>> {
        let session = self.get_session(server.id, sid).await?;
        self.agent.check(server, &session, ctx).await
    }

    /// Append to the server's bounded activity ring, newest first.
    /// Logging failures are reported but never fail the operation.
    async fn log_activity(&self, svid: i64, uid: i64, sid: i64, action: &str) {
        let key = keys::server_activity(svid);
        let record = format!("{action};{uid};{sid};{}", httpdate(chrono::Utc::now()));

        let result: BrokerResult<()> = async {
            self.store.lpush(&key, &record).await?;
            if self.store.llen(&key).await? > ACTIVITY_MAX {
                self.store.rpop(&key).await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!(svid, uid, sid, action, error = %e, "activity record not written");
        }
    }
}

fn parse_pair(s: &str) -> Option<(i64, i64)> {
    let (v, sid) = s.split_once(':')?;
    Some((v.parse().ok()?, sid.parse().ok()?))
}
