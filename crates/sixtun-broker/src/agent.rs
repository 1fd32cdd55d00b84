//! Tunnel agent driver.
//!
//! The agent is the remote component that stands tunnels up and down on
//! the endpoint's network stack. The broker only ever talks to it
//! through the signed protocol; the OS-level work behind it is opaque.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use sixtun_proto::{
    check_service, httpdate, AgentRequest, AgentResponse, ErrNo, IdEntry, IdList, Signer,
    HDR_SERVICE, HDR_SIGNATURE,
};

use crate::error::{BrokerError, BrokerResult};
use crate::model::{Server, Session};

/// Correlation fields carried into every agent call.
#[derive(Debug, Clone, Copy)]
pub struct AgentCtx {
    pub user_id: i64,
    pub msg_id: i64,
}

/// One per-address-family reachability measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    /// Probed address.
    pub target: String,
    /// Round-trip time; `None` when the family was unreachable.
    pub rtt: Option<Duration>,
}

/// Driver for a server's tunnel agent.
///
/// Calls are blocking, single-attempt and bounded by the message
/// freshness window; a failure is terminal for the request.
#[async_trait]
pub trait AgentDriver: Send + Sync {
    /// Stand the tunnel up for `session` on `server`.
    async fn activate(&self, server: &Server, session: &Session, ctx: AgentCtx)
        -> BrokerResult<()>;

    /// Tear the tunnel down.
    async fn deactivate(
        &self,
        server: &Server,
        session: &Session,
        ctx: AgentCtx,
    ) -> BrokerResult<()>;

    /// Measure per-family reachability of the session's endpoints.
    async fn check(
        &self,
        server: &Server,
        session: &Session,
        ctx: AgentCtx,
    ) -> BrokerResult<Vec<ProbeResult>>;

    /// The agent's own status report, proxied verbatim.
    async fn status(&self, server: &Server, ctx: AgentCtx) -> BrokerResult<String>;
}

/// HTTP driver posting signed envelopes to the server's management URL.
pub struct HttpAgentDriver {
    client: reqwest::Client,
    signer: Signer,
    /// Our identity, sent with every request.
    service_name: String,
    /// Identity the agent must present in its responses.
    peer_name: String,
}

impl HttpAgentDriver {
    /// The single attempt gets the whole freshness window and no more.
    const TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(signer: Signer, service_name: &str, peer_name: &str) -> BrokerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Self::TIMEOUT)
            .build()
            .map_err(|e| BrokerError::Upstream(e.to_string()))?;
        Ok(Self {
            client,
            signer,
            service_name: service_name.to_string(),
            peer_name: peer_name.to_string(),
        })
    }

    fn session_payload(session: &Session) -> BrokerResult<String> {
        let entry = IdEntry {
            id: session.index()?,
            err_no: ErrNo::Ok,
            opt: session.dst.clone().unwrap_or_default(),
        };
        serde_json::to_string(&IdList {
            id: 0,
            entry: vec![entry],
        })
        .map_err(|e| BrokerError::Validation(e.to_string()))
    }

    async fn post(
        &self,
        server: &Server,
        command: &str,
        data: String,
        ctx: AgentCtx,
    ) -> BrokerResult<AgentResponse> {
        if server.url.is_empty() {
            return Err(BrokerError::Upstream(format!(
                "server [{}] has no management url",
                server.id
            )));
        }

        let req = AgentRequest {
            id: server.id,
            user_id: ctx.user_id,
            msg_id: ctx.msg_id,
            command: command.to_string(),
            data,
        };
        let body = serde_json::to_vec(&req).map_err(|e| BrokerError::Validation(e.to_string()))?;
        let url = format!("{}/{command}", server.url);

        debug!(url = %url, server = server.id, msg_id = ctx.msg_id, "sending agent request");

        let res = self
            .client
            .post(&url)
            .header("Date", httpdate(chrono::Utc::now()))
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .header(HDR_SERVICE, &self.service_name)
            .header(HDR_SIGNATURE, self.signer.sign(&body))
            .body(body)
            .send()
            .await
            .map_err(|e| BrokerError::Upstream(e.to_string()))?;

        let peer = res
            .headers()
            .get(HDR_SERVICE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        check_service(&self.peer_name, &peer).map_err(|_| {
            BrokerError::Upstream(format!("unexpected agent identity: {peer}"))
        })?;

        let sig = res
            .headers()
            .get(HDR_SIGNATURE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let raw = res
            .bytes()
            .await
            .map_err(|e| BrokerError::Upstream(e.to_string()))?;

        // the signature covers the exact bytes on the wire
        self.signer
            .verify(&sig, &raw)
            .map_err(|e| BrokerError::Upstream(e.to_string()))?;

        let msg: AgentResponse = serde_json::from_slice(&raw)
            .map_err(|_| BrokerError::Upstream("invalid agent response data".to_string()))?;

        if msg.err_no != ErrNo::Ok {
            return Err(BrokerError::Upstream(format!(
                "agent [{}] reported error",
                server.id
            )));
        }

        debug!(server = server.id, msg_id = msg.msg_id, "agent reply received");
        Ok(msg)
    }
}

#[async_trait]
impl AgentDriver for HttpAgentDriver {
    async fn activate(
        &self,
        server: &Server,
        session: &Session,
        ctx: AgentCtx,
    ) -> BrokerResult<()> {
        let data = Self::session_payload(session)?;
        self.post(server, "activate", data, ctx).await?;
        Ok(())
    }

    async fn deactivate(
        &self,
        server: &Server,
        session: &Session,
        ctx: AgentCtx,
    ) -> BrokerResult<()> {
        let data = Self::session_payload(session)?;
        self.post(server, "deactivate", data, ctx).await?;
        Ok(())
    }

    async fn check(
        &self,
        server: &Server,
        session: &Session,
        ctx: AgentCtx,
    ) -> BrokerResult<Vec<ProbeResult>> {
        let data = Self::session_payload(session)?;
        let msg = self.post(server, "check", data, ctx).await?;

        // each response entry is one probed family: Opt carries the
        // address, Id the round trip in microseconds, ErrNo marks an
        // unreachable target
        let list: IdList = serde_json::from_str(&msg.data)
            .map_err(|_| BrokerError::Upstream("invalid agent probe data".to_string()))?;

        Ok(list
            .entry
            .into_iter()
            .map(|e| ProbeResult {
                target: e.opt,
                rtt: (e.err_no == ErrNo::Ok).then(|| Duration::from_micros(e.id.max(0) as u64)),
            })
            .collect())
    }

    async fn status(&self, server: &Server, ctx: AgentCtx) -> BrokerResult<String> {
        let msg = self.post(server, "status", String::new(), ctx).await?;
        Ok(msg.data)
    }
}
