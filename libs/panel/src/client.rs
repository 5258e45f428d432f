//! `reqwest` implementation of [`PanelApi`].

use async_trait::async_trait;
use reqwest::{header, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::api::PanelApi;
use crate::error::{PanelError, PanelResult};
use crate::types::{
    ClientKey, ClientRequest, ClientSpec, ClientTraffic, Envelope, HealthObj, HealthReport,
    InboundObj, PanelEndpoint, PanelSession, RemoteClient, ServerStats, StatusObj, TrafficObj,
    WireClient, WireSettings,
};

/// HTTP client shared by every node; endpoints are passed per call.
///
/// Carries no deadlines of its own. Callers bound each call with
/// `tokio::time::timeout`, reading the current limit at call time, so a
/// reloaded timeout applies to the next call in either direction.
#[derive(Clone)]
pub struct PanelClient {
    client: reqwest::Client,
}

impl PanelClient {
    /// Create a new panel client.
    pub fn new() -> PanelResult<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| PanelError::Malformed(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    fn authed(&self, builder: RequestBuilder, session: &PanelSession) -> RequestBuilder {
        builder.header(header::COOKIE, &session.cookie)
    }

    /// Send a request and unwrap the `{success, msg, obj}` envelope.
    async fn call<T: DeserializeOwned>(&self, builder: RequestBuilder) -> PanelResult<Option<T>> {
        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(PanelError::AuthRejected);
        }
        if status.is_redirection() {
            // Expired sessions are bounced to the login page.
            return Err(PanelError::AuthRejected);
        }
        if !status.is_success() {
            return Err(PanelError::Http {
                status: status.as_u16(),
            });
        }

        let envelope: Envelope<T> = response.json().await?;
        if !envelope.success {
            return Err(PanelError::Rejected {
                message: envelope.msg,
            });
        }
        Ok(envelope.obj)
    }

    async fn call_unit(&self, builder: RequestBuilder) -> PanelResult<()> {
        self.call::<serde_json::Value>(builder).await.map(|_| ())
    }

    fn client_body(inbound_id: i64, client: &ClientSpec) -> PanelResult<ClientRequest> {
        let settings = serde_json::to_string(&WireSettings {
            clients: vec![WireClient::from(client)],
        })?;
        Ok(ClientRequest {
            id: inbound_id,
            settings,
        })
    }
}

#[async_trait]
impl PanelApi for PanelClient {
    async fn authenticate(&self, endpoint: &PanelEndpoint) -> PanelResult<PanelSession> {
        let url = format!("{}/login", endpoint.base_url);
        debug!(url = %url, "Authenticating with panel");

        let response = self
            .client
            .post(&url)
            .form(&[
                ("username", endpoint.username.as_str()),
                ("password", endpoint.password.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(PanelError::AuthRejected);
        }
        if !status.is_success() {
            return Err(PanelError::Http {
                status: status.as_u16(),
            });
        }

        let cookie = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .collect::<Vec<_>>()
            .join("; ");

        let envelope: Envelope<serde_json::Value> = response.json().await?;
        if !envelope.success {
            warn!(url = %url, msg = %envelope.msg, "Panel rejected login");
            return Err(PanelError::AuthRejected);
        }
        if cookie.is_empty() {
            return Err(PanelError::Malformed(
                "login succeeded without a session cookie".to_string(),
            ));
        }

        Ok(PanelSession {
            base_url: endpoint.base_url.clone(),
            cookie,
        })
    }

    async fn health_probe(&self, endpoint: &PanelEndpoint) -> PanelResult<HealthReport> {
        let url = format!("{}/health", endpoint.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PanelError::Unreachable(e.to_string()))?;

        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            return Ok(HealthReport { maintenance: true });
        }

        // Any answer means the node is up; the body only refines it.
        let body = response.text().await.unwrap_or_default();
        let obj = serde_json::from_str::<Envelope<HealthObj>>(&body)
            .ok()
            .and_then(|envelope| envelope.obj)
            .unwrap_or_default();

        Ok(HealthReport {
            maintenance: obj.maintenance,
        })
    }

    async fn fetch_stats(&self, session: &PanelSession) -> PanelResult<ServerStats> {
        let url = format!("{}/server/status", session.base_url);
        let obj: Option<StatusObj> = self
            .call(self.authed(self.client.post(&url), session))
            .await?;

        obj.map(ServerStats::from)
            .ok_or_else(|| PanelError::Malformed("status response without obj".to_string()))
    }

    async fn add_client(
        &self,
        session: &PanelSession,
        inbound_id: i64,
        client: &ClientSpec,
    ) -> PanelResult<()> {
        let url = format!("{}/panel/api/inbounds/addClient", session.base_url);
        let body = Self::client_body(inbound_id, client)?;
        debug!(inbound_id, email = %client.email, "Adding panel client");

        self.call_unit(self.authed(self.client.post(&url).json(&body), session))
            .await
    }

    async fn update_client(
        &self,
        session: &PanelSession,
        inbound_id: i64,
        client: &ClientSpec,
    ) -> PanelResult<()> {
        let url = format!(
            "{}/panel/api/inbounds/updateClient/{}",
            session.base_url, client.uuid
        );
        let body = Self::client_body(inbound_id, client)?;
        debug!(inbound_id, email = %client.email, enabled = client.enabled, "Updating panel client");

        self.call_unit(self.authed(self.client.post(&url).json(&body), session))
            .await
    }

    async fn delete_client(
        &self,
        session: &PanelSession,
        inbound_id: i64,
        client: &ClientKey,
    ) -> PanelResult<()> {
        let url = format!(
            "{}/panel/api/inbounds/{}/delClient/{}",
            session.base_url, inbound_id, client.uuid
        );
        debug!(inbound_id, email = %client.email, "Deleting panel client");

        self.call_unit(self.authed(self.client.post(&url), session))
            .await
    }

    async fn client_traffic(
        &self,
        session: &PanelSession,
        _inbound_id: i64,
        email: &str,
    ) -> PanelResult<ClientTraffic> {
        let url = format!(
            "{}/panel/api/inbounds/getClientTraffics/{}",
            session.base_url, email
        );
        let obj: Option<TrafficObj> = self
            .call(self.authed(self.client.get(&url), session))
            .await?;

        obj.map(|t| ClientTraffic {
            up: t.up,
            down: t.down,
        })
        .ok_or_else(|| PanelError::Rejected {
            message: format!("client {email} not found"),
        })
    }

    async fn reset_client_traffic(
        &self,
        session: &PanelSession,
        inbound_id: i64,
        email: &str,
    ) -> PanelResult<()> {
        let url = format!(
            "{}/panel/api/inbounds/{}/resetClientTraffic/{}",
            session.base_url, inbound_id, email
        );
        self.call_unit(self.authed(self.client.post(&url), session))
            .await
    }

    async fn list_clients(
        &self,
        session: &PanelSession,
        inbound_id: i64,
    ) -> PanelResult<Vec<RemoteClient>> {
        let url = format!("{}/panel/api/inbounds/get/{}", session.base_url, inbound_id);
        let inbound: InboundObj = self
            .call(self.authed(self.client.get(&url), session))
            .await?
            .ok_or_else(|| PanelError::Rejected {
                message: format!("inbound {inbound_id} not found"),
            })?;

        let settings: WireSettings = serde_json::from_str(&inbound.settings)?;
        let stats = inbound.client_stats.unwrap_or_default();

        Ok(settings
            .clients
            .into_iter()
            .map(|client| {
                let traffic = stats
                    .iter()
                    .find(|s| s.email == client.email)
                    .map(|s| ClientTraffic {
                        up: s.up,
                        down: s.down,
                    })
                    .unwrap_or_default();
                RemoteClient {
                    uuid: client.id.as_deref().and_then(|id| id.parse().ok()),
                    email: client.email,
                    enabled: client.enable,
                    traffic,
                }
            })
            .collect())
    }
}
