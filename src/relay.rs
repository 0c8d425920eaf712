use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use solana_sdk::transaction::VersionedTransaction;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BundlerConfig;
use crate::error::{BundlerError, Result};

/// Outcome reported by the relay for one bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReceipt {
    pub bundle_id: String,
    pub confirmed: bool,
    pub error: Option<String>,
}

/// All-or-nothing submission of an ordered transaction list.
#[async_trait]
pub trait BundleRelay: Send + Sync {
    async fn submit(&self, transactions: &[VersionedTransaction]) -> Result<RelayReceipt>;
}

#[derive(Serialize)]
struct JsonRpcRequest<P: Serialize> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: P,
}

#[derive(Deserialize)]
struct JsonRpcResponse<R> {
    result: Option<R>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct StatusesResult {
    value: Vec<Option<BundleStatus>>,
}

#[derive(Deserialize)]
struct BundleStatus {
    confirmation_status: Option<String>,
    err: Option<serde_json::Value>,
}

#[derive(Debug, PartialEq, Eq)]
enum StatusPoll {
    Pending,
    Landed,
    Failed(String),
}

pub struct JitoRelay {
    http: reqwest::Client,
    endpoint: String,
    confirm_timeout: Duration,
    poll_interval: Duration,
}

impl JitoRelay {
    pub fn new(config: &BundlerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/api/v1/bundles", config.block_engine_url.trim_end_matches('/')),
            confirm_timeout: Duration::from_secs(config.bundle_confirm_timeout_secs),
            poll_interval: Duration::from_millis(config.bundle_poll_interval_ms),
        })
    }

    async fn call<P: Serialize + Send + Sync, R: DeserializeOwned + Send>(
        &self,
        method: &'static str,
        params: P,
    ) -> Result<R> {
        let request = JsonRpcRequest { jsonrpc: "2.0", id: 1, method, params };
        let response = self.http.post(&self.endpoint).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(BundlerError::Relay(format!("{method} failed: {}", response.status())));
        }
        let body: JsonRpcResponse<R> = response.json().await?;
        unwrap_response(method, body)
    }

    async fn poll_status(&self, bundle_id: &str) -> Result<StatusPoll> {
        let result: StatusesResult = self.call("getBundleStatuses", [[bundle_id]]).await?;
        Ok(classify(result))
    }
}

fn unwrap_response<R>(method: &str, body: JsonRpcResponse<R>) -> Result<R> {
    if let Some(err) = body.error {
        return Err(BundlerError::Relay(format!("{method}: {} ({})", err.message, err.code)));
    }
    body.result
        .ok_or_else(|| BundlerError::Relay(format!("{method}: empty result")))
}

fn classify(result: StatusesResult) -> StatusPoll {
    match result.value.into_iter().next().flatten() {
        None => StatusPoll::Pending,
        Some(BundleStatus { err: Some(err), .. }) if !is_ok_marker(&err) => {
            StatusPoll::Failed(err.to_string())
        }
        Some(BundleStatus { confirmation_status: Some(s), .. })
            if s == "confirmed" || s == "finalized" =>
        {
            StatusPoll::Landed
        }
        Some(_) => StatusPoll::Pending,
    }
}

// the block engine reports success as {"Ok": null}
fn is_ok_marker(err: &serde_json::Value) -> bool {
    err.is_null() || err.get("Ok").is_some()
}

#[async_trait]
impl BundleRelay for JitoRelay {
    async fn submit(&self, transactions: &[VersionedTransaction]) -> Result<RelayReceipt> {
        let encoded = transactions
            .iter()
            .map(|tx| {
                bincode::serialize(tx)
                    .map(|bytes| bs58::encode(bytes).into_string())
                    .map_err(|e| BundlerError::Relay(format!("encode transaction: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let bundle_id: String = self.call("sendBundle", [encoded]).await?;
        info!(%bundle_id, txs = transactions.len(), "bundle submitted");

        let start = Instant::now();
        loop {
            match self.poll_status(&bundle_id).await {
                Ok(StatusPoll::Landed) => {
                    return Ok(RelayReceipt { bundle_id, confirmed: true, error: None });
                }
                Ok(StatusPoll::Failed(reason)) => {
                    warn!(%bundle_id, %reason, "bundle failed");
                    return Ok(RelayReceipt { bundle_id, confirmed: false, error: Some(reason) });
                }
                Ok(StatusPoll::Pending) => debug!(%bundle_id, "bundle pending"),
                Err(e) => debug!(%bundle_id, error = %e, "status poll failed"),
            }
            if start.elapsed() >= self.confirm_timeout {
                return Ok(RelayReceipt {
                    bundle_id,
                    confirmed: false,
                    error: Some("confirmation timed out".into()),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statuses(json: &str) -> StatusPoll {
        let body: JsonRpcResponse<StatusesResult> = serde_json::from_str(json).unwrap();
        classify(unwrap_response("getBundleStatuses", body).unwrap())
    }

    #[test]
    fn unknown_bundle_is_pending() {
        assert_eq!(
            statuses(r#"{"jsonrpc":"2.0","result":{"context":{"slot":1},"value":[null]},"id":1}"#),
            StatusPoll::Pending
        );
    }

    #[test]
    fn confirmed_and_finalized_land() {
        let json = r#"{"jsonrpc":"2.0","result":{"context":{"slot":242806119},"value":[
            {"bundle_id":"abc","transactions":["x"],"slot":242804011,
             "confirmation_status":"finalized","err":{"Ok":null}}]},"id":1}"#;
        assert_eq!(statuses(json), StatusPoll::Landed);

        let json = json.replace("finalized", "processed");
        assert_eq!(statuses(&json), StatusPoll::Pending);
    }

    #[test]
    fn bundle_error_is_failure() {
        let json = r#"{"jsonrpc":"2.0","result":{"context":{"slot":1},"value":[
            {"bundle_id":"abc","confirmation_status":"processed","err":{"Err":"InstructionError"}}]},"id":1}"#;
        assert!(matches!(statuses(json), StatusPoll::Failed(_)));
    }

    #[test]
    fn rpc_error_surfaces() {
        let body: JsonRpcResponse<String> = serde_json::from_str(
            r#"{"jsonrpc":"2.0","error":{"code":-32602,"message":"bundle contains an expired blockhash"},"id":1}"#,
        )
        .unwrap();
        let err = unwrap_response("sendBundle", body).unwrap_err();
        assert!(err.to_string().contains("expired blockhash"));
    }

    #[test]
    fn endpoint_built_from_config() {
        let mut cfg = BundlerConfig::default();
        cfg.block_engine_url = "https://ny.mainnet.block-engine.jito.wtf/".into();
        let relay = JitoRelay::new(&cfg).unwrap();
        assert_eq!(relay.endpoint, "https://ny.mainnet.block-engine.jito.wtf/api/v1/bundles");
    }
}
