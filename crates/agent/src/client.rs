//! HTTP client for the fleet server.
//!
//! Every request carries the capability token in `x-agent-key`. The
//! server scopes that token to specific node servers, so a misconfigured
//! agent gets 403s rather than silently polluting another node's record.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use stakewatch_common::report::{AgentReport, IngestSummary, SoftwareVersions, SystemMetrics};

const AGENT_KEY_HEADER: &str = "x-agent-key";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// What `GET /nodes/{id}/config` returns.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    pub server: Value,
    pub pubkeys: Vec<String>,
    pub poll_interval_secs: u64,
}

/// The slice of a queued command the agent acts on. Unknown fields from
/// the server are ignored so the two sides can evolve independently.
#[derive(Debug, Clone, Deserialize)]
pub struct PendingCommand {
    pub id: String,
    pub command_type: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
struct PendingEnvelope {
    commands: Vec<PendingCommand>,
}

#[derive(Debug)]
pub struct FleetClient {
    http: reqwest::Client,
    base: String,
    token: String,
    node_id: String,
}

impl FleetClient {
    pub fn new(base: impl Into<String>, token: impl Into<String>, node_id: impl Into<String>) -> Result<FleetClient> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(FleetClient {
            http,
            base: base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            node_id: node_id.into(),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// POST /nodes/{id}/report
    pub async fn push_report(&self, report: &AgentReport) -> Result<IngestSummary> {
        let url = format!("{}/nodes/{}/report", self.base, self.node_id);
        let response = self
            .http
            .post(&url)
            .header(AGENT_KEY_HEADER, &self.token)
            .json(report)
            .send()
            .await
            .context("report push failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("report rejected with status {}", response.status()));
        }
        let summary: IngestSummary = response.json().await.context("bad report summary")?;
        debug!(
            success = summary.success,
            updated = summary.validators_updated,
            "report accepted"
        );
        Ok(summary)
    }

    /// GET /nodes/{id}/config
    pub async fn fetch_config(&self) -> Result<NodeConfig> {
        let url = format!("{}/nodes/{}/config", self.base, self.node_id);
        let response = self
            .http
            .get(&url)
            .header(AGENT_KEY_HEADER, &self.token)
            .send()
            .await
            .context("config fetch failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("config fetch returned {}", response.status()));
        }
        response.json().await.context("bad node config")
    }

    /// GET /nodes/{id}/commands/pending
    pub async fn poll_pending(&self) -> Result<Vec<PendingCommand>> {
        let url = format!("{}/nodes/{}/commands/pending", self.base, self.node_id);
        let response = self
            .http
            .get(&url)
            .header(AGENT_KEY_HEADER, &self.token)
            .send()
            .await
            .context("command poll failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("command poll returned {}", response.status()));
        }
        let envelope: PendingEnvelope = response.json().await.context("bad command list")?;
        Ok(envelope.commands)
    }

    /// PUT /commands/{id}
    pub async fn update_command(&self, id: &str, status: &str, log: Option<String>) -> Result<()> {
        let url = format!("{}/commands/{}", self.base, id);
        let response = self
            .http
            .put(&url)
            .header(AGENT_KEY_HEADER, &self.token)
            .json(&json!({"status": status, "log": log}))
            .send()
            .await
            .context("command update failed")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "command {} update to {} returned {}",
                id,
                status,
                response.status()
            ));
        }
        Ok(())
    }

    /// PUT /servers/{id}/version
    pub async fn put_versions(&self, versions: &SoftwareVersions) -> Result<()> {
        self.put_json(&format!("{}/servers/{}/version", self.base, self.node_id), versions)
            .await
    }

    /// PUT /servers/{id}/metrics
    pub async fn put_metrics(&self, metrics: &SystemMetrics) -> Result<()> {
        self.put_json(&format!("{}/servers/{}/metrics", self.base, self.node_id), metrics)
            .await
    }

    async fn put_json<T: serde::Serialize>(&self, url: &str, body: &T) -> Result<()> {
        let response = self
            .http
            .put(url)
            .header(AGENT_KEY_HEADER, &self.token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("PUT {} failed", url))?;
        if !response.status().is_success() {
            return Err(anyhow!("PUT {} returned {}", url, response.status()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_push_report_carries_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/nodes/node-1/report"))
            .and(header(AGENT_KEY_HEADER, "sekrit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "validatorsUpdated": 2,
                "alertsDispatched": 0
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = FleetClient::new(server.uri(), "sekrit", "node-1").expect("client");
        let summary = client.push_report(&AgentReport::default()).await.expect("push");
        assert!(summary.success);
        assert_eq!(summary.validators_updated, 2);
    }

    #[tokio::test]
    async fn test_poll_pending_decodes_commands() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nodes/node-1/commands/pending"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "commands": [{
                    "id": "cmd-1",
                    "command_type": "REFRESH_DATA",
                    "target_node": "node-1",
                    "payload": null,
                    "status": "pending",
                    "logs": [],
                    "created_by": "alice",
                    "created_at": 1,
                    "updated_at": 1,
                    "started_at": null,
                    "finished_at": null
                }]
            })))
            .mount(&server)
            .await;

        let client = FleetClient::new(server.uri(), "sekrit", "node-1").expect("client");
        let pending = client.poll_pending().await.expect("poll");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "cmd-1");
        assert_eq!(pending[0].command_type, "REFRESH_DATA");
    }

    #[tokio::test]
    async fn test_update_command_sends_status_and_log() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/commands/cmd-1"))
            .and(body_partial_json(serde_json::json!({
                "status": "completed",
                "log": "done"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = FleetClient::new(server.uri(), "sekrit", "node-1").expect("client");
        client
            .update_command("cmd-1", "completed", Some("done".to_string()))
            .await
            .expect("update");
    }

    #[tokio::test]
    async fn test_rejected_request_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/nodes/node-1/report"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": "forbidden"
            })))
            .mount(&server)
            .await;

        let client = FleetClient::new(server.uri(), "wrong", "node-1").expect("client");
        let err = client.push_report(&AgentReport::default()).await.unwrap_err();
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn test_fetch_config_decodes_camel_case() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nodes/node-1/config"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "server": {"id": "node-1", "name": "helsinki-1", "role": "combined"},
                "pubkeys": ["0xaa", "0xbb"],
                "pollIntervalSecs": 30
            })))
            .mount(&server)
            .await;

        let client = FleetClient::new(server.uri(), "sekrit", "node-1").expect("client");
        let config = client.fetch_config().await.expect("fetch");
        assert_eq!(config.pubkeys.len(), 2);
        assert_eq!(config.poll_interval_secs, 30);
    }
}
