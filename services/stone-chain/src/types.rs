use serde::Deserialize;

/// A single attribute-bearing wasm event, exactly as emitted by a
/// transaction. `spec.md` §4.2: `type` selects wasm vs. everything else,
/// `attributes` is the ordered `(key, value)` list the decoder consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct WasmEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub attributes: Vec<(String, String)>,
}

impl WasmEvent {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A block header plus the hashes of the transactions it contains, in
/// declared order.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockInfo {
    pub height: u64,
    pub hash: String,
    /// Seconds since epoch.
    pub time: i64,
    pub tx_hashes: Vec<String>,
}

/// A decoded transaction result. `code == 0` means the transaction
/// succeeded; anything else means it emitted no durable projection
/// (`spec.md` §4.5 step 3.1).
#[derive(Debug, Clone, Deserialize)]
pub struct TxInfo {
    pub hash: String,
    pub height: u64,
    pub code: u32,
    pub events: Vec<WasmEvent>,
}

impl TxInfo {
    pub fn succeeded(&self) -> bool {
        self.code == 0
    }
}
