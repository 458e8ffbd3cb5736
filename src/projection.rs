//! Incentive projection service client.
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ProjectError;
use crate::model::{Goals, Incentive, Metrics, Seller};

const GENERIC_PROJECT_ERROR: &str = "failed to calculate incentives";

/// The seller as seen by the projection service: identity plus the
/// validated metrics that were persisted. Never carries the password.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionSeller<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub avatar_id: &'a str,
    #[serde(flatten)]
    pub metrics: Metrics,
}

impl<'a> ProjectionSeller<'a> {
    pub fn new(seller: &'a Seller, metrics: Metrics) -> Self {
        Self {
            id: &seller.id,
            name: &seller.name,
            avatar_id: &seller.avatar_id,
            metrics,
        }
    }
}

#[async_trait]
pub trait IncentiveProjector: Send + Sync {
    async fn project(
        &self,
        seller: &ProjectionSeller<'_>,
        goals: &Goals,
    ) -> Result<Incentive, ProjectError>;
}

/// Calls a projection flow over HTTP: `POST {base}/{flow}` with
/// `{"data": {"seller": .., "goals": ..}}`, answered by `{"result": ..}`.
#[derive(Clone)]
pub struct HttpProjector {
    http: Client,
    endpoint: Url,
}

impl fmt::Debug for HttpProjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpProjector")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct ProjectionInput<'a> {
    seller: &'a ProjectionSeller<'a>,
    goals: &'a Goals,
}

#[derive(Serialize)]
struct ProjectionRequest<'a> {
    data: ProjectionInput<'a>,
}

#[derive(Deserialize)]
struct ProjectionResponse {
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl HttpProjector {
    pub fn new(base_url: &str, flow: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url).context("invalid projection base URL")?;
        let endpoint = base
            .join(flow.trim_start_matches('/'))
            .context("invalid projection flow name")?;
        let http = Client::builder()
            .user_agent("goal-getter/0.1")
            .timeout(timeout)
            .no_proxy()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn build_request(
        &self,
        seller: &ProjectionSeller<'_>,
        goals: &Goals,
    ) -> Result<reqwest::Request> {
        let body = ProjectionRequest {
            data: ProjectionInput { seller, goals },
        };
        self.http
            .post(self.endpoint.clone())
            .header("Content-Type", "application/json")
            .json(&body)
            .build()
            .context("failed to build projection request")
    }
}

/// Extract a display message from an `error` member that is either a string
/// or an object with a `message` string.
fn error_text(error: &Value) -> Option<String> {
    match error {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string),
        _ => None,
    }
}

#[async_trait]
impl IncentiveProjector for HttpProjector {
    async fn project(
        &self,
        seller: &ProjectionSeller<'_>,
        goals: &Goals,
    ) -> Result<Incentive, ProjectError> {
        let request = self
            .build_request(seller, goals)
            .map_err(|err| ProjectError::new(format!("{err:#}")))?;
        debug!(url = %request.url(), seller_id = seller.id, "requesting projection");

        let res = self.http.execute(request).await.map_err(|err| {
            warn!(?err, seller_id = seller.id, "projection service unreachable");
            ProjectError::new(format!("{GENERIC_PROJECT_ERROR}: {err}"))
        })?;
        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|err| ProjectError::new(format!("{GENERIC_PROJECT_ERROR}: {err}")))?;

        let parsed = serde_json::from_str::<ProjectionResponse>(&body);
        if !status.is_success() {
            warn!(%status, %body, seller_id = seller.id, "projection failed");
            let message = parsed
                .ok()
                .and_then(|r| r.error)
                .and_then(|e| error_text(&e))
                .unwrap_or_else(|| format!("{GENERIC_PROJECT_ERROR}: status {status}"));
            return Err(ProjectError::new(message));
        }

        let parsed = parsed
            .map_err(|err| ProjectError::new(format!("invalid projection response: {err}")))?;
        if let Some(message) = parsed.error.as_ref().and_then(error_text) {
            return Err(ProjectError::new(message));
        }
        parsed
            .result
            .map(Incentive)
            .ok_or_else(|| ProjectError::new("projection response has no result"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricsInput;
    use serde_json::json;

    fn seller() -> Seller {
        Seller {
            id: "s1".into(),
            name: "Ana".into(),
            avatar_id: "avatar-3".into(),
            metrics: MetricsInput::zeroed(),
            password: "ana-secret".into(),
        }
    }

    #[test]
    fn endpoint_joins_flow_name() {
        let p = HttpProjector::new("http://localhost:3400/", "/incentiveProjection", Duration::from_secs(1))
            .unwrap();
        assert_eq!(p.endpoint().as_str(), "http://localhost:3400/incentiveProjection");
    }

    #[test]
    fn request_wraps_seller_and_goals_without_password() {
        let p = HttpProjector::new("http://localhost:3400/", "incentiveProjection", Duration::from_secs(1))
            .unwrap();
        let seller = seller();
        let metrics = Metrics {
            vendas: 500.0,
            pa: 1.5,
            ticket_medio: 30.0,
            corridinha_diaria: 5.0,
        };
        let view = ProjectionSeller::new(&seller, metrics);
        let goals = Goals(json!({"metaVendas": 1000}));
        let request = p.build_request(&view, &goals).unwrap();

        let body: Value =
            serde_json::from_slice(request.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(
            body,
            json!({
                "data": {
                    "seller": {
                        "id": "s1",
                        "name": "Ana",
                        "avatarId": "avatar-3",
                        "vendas": 500.0,
                        "pa": 1.5,
                        "ticketMedio": 30.0,
                        "corridinhaDiaria": 5.0
                    },
                    "goals": {"metaVendas": 1000}
                }
            })
        );
        assert!(!body.to_string().contains("ana-secret"));
    }

    #[test]
    fn error_text_accepts_string_or_message_object() {
        assert_eq!(error_text(&json!("quota exceeded")).as_deref(), Some("quota exceeded"));
        assert_eq!(
            error_text(&json!({"status": "INTERNAL", "message": "model failed"})).as_deref(),
            Some("model failed")
        );
        assert_eq!(error_text(&json!({"status": "INTERNAL"})), None);
        assert_eq!(error_text(&json!(42)), None);
    }
}
