use std::collections::HashMap;

use async_trait::async_trait;
use stone_chain::{BlockInfo, ChainAdapter, RpcError, TxInfo};

/// Builds a [`MockChainAdapter`] from fixture data instead of a live RPC
/// endpoint. Unregistered heights, transactions, or contract queries fail
/// the same way a real node would report them missing.
pub struct MockChainAdapterBuilder {
    chain_id: String,
    configs: HashMap<String, serde_json::Value>,
    params: HashMap<String, serde_json::Value>,
    blocks: HashMap<u64, BlockInfo>,
    txs: HashMap<String, TxInfo>,
    latest_height: u64,
}

impl Default for MockChainAdapterBuilder {
    fn default() -> Self {
        Self {
            chain_id: "mock-chain".to_string(),
            configs: HashMap::new(),
            params: HashMap::new(),
            blocks: HashMap::new(),
            txs: HashMap::new(),
            latest_height: 0,
        }
    }
}

impl MockChainAdapterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain_id(mut self, chain_id: &str) -> Self {
        self.chain_id = chain_id.to_string();
        self
    }

    pub fn with_market_config(mut self, address: &str, config: serde_json::Value) -> Self {
        self.configs.insert(address.to_string(), config);
        self
    }

    pub fn with_market_params(mut self, address: &str, params: serde_json::Value) -> Self {
        self.params.insert(address.to_string(), params);
        self
    }

    pub fn with_block(mut self, block: BlockInfo) -> Self {
        self.latest_height = self.latest_height.max(block.height);
        self.blocks.insert(block.height, block);
        self
    }

    pub fn with_tx(mut self, tx: TxInfo) -> Self {
        self.txs.insert(tx.hash.clone(), tx);
        self
    }

    pub fn with_latest_height(mut self, height: u64) -> Self {
        self.latest_height = height;
        self
    }

    pub fn build(self) -> MockChainAdapter {
        MockChainAdapter {
            chain_id: self.chain_id,
            configs: self.configs,
            params: self.params,
            blocks: self.blocks,
            txs: self.txs,
            latest_height: self.latest_height,
        }
    }
}

pub struct MockChainAdapter {
    chain_id: String,
    configs: HashMap<String, serde_json::Value>,
    params: HashMap<String, serde_json::Value>,
    blocks: HashMap<u64, BlockInfo>,
    txs: HashMap<String, TxInfo>,
    latest_height: u64,
}

#[async_trait]
impl ChainAdapter for MockChainAdapter {
    async fn chain_id(&self) -> Result<String, RpcError> {
        Ok(self.chain_id.clone())
    }

    async fn latest_height(&self) -> Result<u64, RpcError> {
        Ok(self.latest_height)
    }

    async fn block(&self, height: u64) -> Result<BlockInfo, RpcError> {
        self.blocks
            .get(&height)
            .cloned()
            .ok_or(RpcError::BlockNotFound(height))
    }

    async fn tx(&self, tx_hash: &str) -> Result<TxInfo, RpcError> {
        self.txs
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| RpcError::TxNotFound(tx_hash.to_string()))
    }

    async fn query_contract(
        &self,
        address: &str,
        query: &serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        if query.get("config").is_some() {
            return self.configs.get(address).cloned().ok_or_else(|| {
                RpcError::QueryFailed {
                    address: address.to_string(),
                    message: "no config fixture registered".to_string(),
                }
            });
        }
        if query.get("params").is_some() {
            return self.params.get(address).cloned().ok_or_else(|| {
                RpcError::QueryFailed {
                    address: address.to_string(),
                    message: "no params fixture registered".to_string(),
                }
            });
        }
        Err(RpcError::QueryFailed {
            address: address.to_string(),
            message: format!("unhandled mock query: {query}"),
        })
    }

    async fn disconnect(&self) -> Result<(), RpcError> {
        Ok(())
    }
}
