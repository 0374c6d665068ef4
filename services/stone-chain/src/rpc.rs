use std::time::Duration;

use backoff::future::retry;
use backoff::ExponentialBackoff;
use serde::Deserialize;

use crate::error::RpcError;
use crate::types::{BlockInfo, TxInfo};
use crate::ChainAdapter;

/// Connection settings for [`RpcChainAdapter`]. `base_url` points at the
/// node's REST/LCD-style gateway (`spec.md` treats the wire protocol as an
/// external collaborator; only the four operations in §4.1 matter here).
#[derive(Debug, Clone)]
pub struct RpcChainAdapterConfig {
    pub base_url: String,
    pub call_timeout: Duration,
    pub max_retry_elapsed: Duration,
}

impl Default for RpcChainAdapterConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            call_timeout: Duration::from_secs(10),
            max_retry_elapsed: Duration::from_secs(5),
        }
    }
}

/// Default [`ChainAdapter`] implementation: a `reqwest` client with a
/// per-call deadline and bounded retry on pure transport failures.
/// Established lazily (reqwest pools connections internally); `disconnect`
/// is a no-op and therefore idempotent.
pub struct RpcChainAdapter {
    client: reqwest::Client,
    config: RpcChainAdapterConfig,
}

impl RpcChainAdapter {
    pub fn new(config: RpcChainAdapterConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.call_timeout)
            .build()
            .expect("reqwest client must build with static config");
        Self { client, config }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, RpcError> {
        let url = format!("{}{}", self.config.base_url, path);
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.config.max_retry_elapsed),
            ..ExponentialBackoff::default()
        };
        let response = retry(backoff, || async {
            self.client.get(&url).send().await.map_err(|e| {
                if e.is_timeout() {
                    backoff::Error::permanent(RpcError::Timeout {
                        endpoint: url.clone(),
                        timeout_ms: self.config.call_timeout.as_millis() as u64,
                    })
                } else if e.is_connect() {
                    backoff::Error::transient(RpcError::Transport(e))
                } else {
                    backoff::Error::permanent(RpcError::Transport(e))
                }
            })
        })
        .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(RpcError::Decode(format!("{url} returned 404")));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| RpcError::Decode(e.to_string()))
    }
}

#[async_trait::async_trait]
impl ChainAdapter for RpcChainAdapter {
    async fn chain_id(&self) -> Result<String, RpcError> {
        #[derive(Deserialize)]
        struct NodeInfoResponse {
            chain_id: String,
        }
        let resp: NodeInfoResponse = self.get_json("/node_info").await?;
        Ok(resp.chain_id)
    }

    async fn latest_height(&self) -> Result<u64, RpcError> {
        #[derive(Deserialize)]
        struct TipResponse {
            height: u64,
        }
        let resp: TipResponse = self.get_json("/blocks/latest").await?;
        Ok(resp.height)
    }

    async fn block(&self, height: u64) -> Result<BlockInfo, RpcError> {
        self.get_json(&format!("/blocks/{height}")).await
    }

    async fn tx(&self, tx_hash: &str) -> Result<TxInfo, RpcError> {
        self.get_json(&format!("/txs/{tx_hash}")).await
    }

    async fn query_contract(
        &self,
        address: &str,
        query: &serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let url = format!("{}/contracts/{address}/query", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .json(query)
            .send()
            .await
            .map_err(RpcError::Transport)?;

        if !response.status().is_success() {
            return Err(RpcError::QueryFailed {
                address: address.to_string(),
                message: format!("http status {}", response.status()),
            });
        }
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| RpcError::Decode(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), RpcError> {
        // reqwest::Client owns no persistent session to tear down; this
        // exists so the indexer loop has a single, idempotent shutdown hook
        // regardless of which adapter implementation is wired in.
        Ok(())
    }
}
