//! JSON-RPC client for Ethereum nodes
//!
//! Provides a typed interface to Ethereum JSON-RPC endpoints.
//! Every request carries a timeout; transport failures and timeouts are
//! reported as connectivity errors, malformed payloads as decode errors.

use crate::chain::{ChainClient, LogFilter};
use crate::error::ConnectorError;
use crate::types::{pad_hex_string, parse_hex_u64, BlockHeader, Log, Receipt};
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

/// `balanceOf(address)`
const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
/// `name()`
const NAME_SELECTOR: [u8; 4] = [0x06, 0xfd, 0xde, 0x03];
/// `symbol()`
const SYMBOL_SELECTOR: [u8; 4] = [0x95, 0xd8, 0x9b, 0x41];
/// `decimals()`
const DECIMALS_SELECTOR: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];
/// `totalSupply()`
const TOTAL_SUPPLY_SELECTOR: [u8; 4] = [0x18, 0x16, 0x0d, 0xdd];

/// ERC20 token metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: String,
}

/// JSON-RPC client for Ethereum nodes.
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
}

impl RpcClient {
    /// Create a new RPC client with a per-request timeout.
    pub fn new(url: String, timeout: Duration) -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectorError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Make a JSON-RPC call, keeping node-side errors apart from transport
    /// failures. The inner `Err` carries the JSON-RPC error object.
    async fn call_raw(&self, method: &str, params: Value) -> Result<Result<Value, Value>, ConnectorError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let json: Value = response.json().await?;

        // Check for RPC error
        if let Some(error) = json.get("error") {
            return Ok(Err(error.clone()));
        }

        json.get("result")
            .cloned()
            .map(Ok)
            .ok_or_else(|| ConnectorError::Decode(format!("RPC response to {} missing 'result' field", method)))
    }

    /// Make a JSON-RPC call.
    async fn call(&self, method: &str, params: Value) -> Result<Value, ConnectorError> {
        self.call_raw(method, params)
            .await?
            .map_err(|error| ConnectorError::Connectivity(format!("RPC error in {}: {}", method, error)))
    }

    /// Execute a read-only call against the latest block.
    ///
    /// Returns `Ok(None)` when the node rejects the call (revert, unknown
    /// method on the target contract).
    pub async fn try_eth_call(&self, to: Address, calldata: &[u8]) -> Result<Option<Vec<u8>>, ConnectorError> {
        let params = json!([{
            "to": format!("0x{:x}", to),
            "data": format!("0x{}", hex::encode(calldata)),
        }, "latest"]);
        let result = match self.call_raw("eth_call", params).await? {
            Ok(result) => result,
            Err(error) => {
                tracing::debug!("eth_call to 0x{:x} rejected: {}", to, error);
                return Ok(None);
            }
        };
        let s = result
            .as_str()
            .ok_or_else(|| ConnectorError::Decode("eth_call result is not a string".into()))?;
        let s = s.strip_prefix("0x").unwrap_or(s);
        hex::decode(pad_hex_string(s))
            .map(Some)
            .map_err(|e| ConnectorError::Decode(format!("eth_call result: {}", e)))
    }

    /// Like [`RpcClient::try_eth_call`], but a rejected call is an error.
    pub async fn eth_call(&self, to: Address, calldata: &[u8]) -> Result<Vec<u8>, ConnectorError> {
        self.try_eth_call(to, calldata).await?.ok_or_else(|| {
            ConnectorError::Connectivity(format!("eth_call to 0x{:x} was rejected by the node", to))
        })
    }

    /// Chain id reported by the node.
    pub async fn chain_id(&self) -> Result<u64, ConnectorError> {
        let result = self.call("eth_chainId", json!([])).await?;
        parse_quantity(&result, "eth_chainId")
    }

    /// ERC20 metadata of a contract.
    ///
    /// Returns `Ok(None)` when the contract does not answer like an ERC20
    /// token (missing methods, empty name or symbol, zero supply).
    pub async fn token_metadata(&self, token: Address) -> Result<Option<TokenMetadata>, ConnectorError> {
        let name = self
            .try_eth_call(token, &NAME_SELECTOR)
            .await?
            .and_then(|bytes| decode_abi_string(&bytes));
        let symbol = self
            .try_eth_call(token, &SYMBOL_SELECTOR)
            .await?
            .and_then(|bytes| decode_abi_string(&bytes));
        let (Some(name), Some(symbol)) = (name, symbol) else {
            return Ok(None);
        };
        if name.is_empty() || symbol.is_empty() {
            return Ok(None);
        }

        let Some(decimals) = self.try_eth_call(token, &DECIMALS_SELECTOR).await? else {
            return Ok(None);
        };
        let Some(total_supply) = self.try_eth_call(token, &TOTAL_SUPPLY_SELECTOR).await? else {
            return Ok(None);
        };
        let decimals = decode_abi_uint(&decimals)?;
        let total_supply = decode_abi_uint(&total_supply)?;
        if total_supply.is_zero() {
            return Ok(None);
        }
        if decimals > U256::from(u8::MAX) {
            return Err(ConnectorError::Decode(format!("decimals out of range: {}", decimals)));
        }
        let decimals = decimals.as_limbs()[0] as u8;

        Ok(Some(TokenMetadata {
            name,
            symbol,
            decimals,
            total_supply: total_supply.to_string(),
        }))
    }
}

#[async_trait]
impl ChainClient for RpcClient {
    async fn block_number(&self) -> Result<u64, ConnectorError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&result, "eth_blockNumber")
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, ConnectorError> {
        let result = self.call("eth_getLogs", json!([filter.to_params()])).await?;
        let entries = match result {
            Value::Null => return Ok(Vec::new()),
            Value::Array(entries) => entries,
            other => {
                return Err(ConnectorError::Decode(format!(
                    "eth_getLogs result is not an array: {}",
                    other
                )))
            }
        };

        // One undecodable entry only costs that entry
        let mut logs = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<Log>(entry) {
                Ok(log) => logs.push(log),
                Err(e) => tracing::warn!("Skipping undecodable log entry: {}", e),
            }
        }
        Ok(logs)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, ConnectorError> {
        let hash_str = format!("0x{:x}", hash);
        let result = self.call("eth_getTransactionReceipt", json!([hash_str])).await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(result)?))
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64, ConnectorError> {
        let block_str = format!("0x{:x}", block);
        let result = self
            .call("eth_getBlockByNumber", json!([block_str, false]))
            .await?;
        if result.is_null() {
            return Err(ConnectorError::NotFound(format!("block {}", block)));
        }
        let header: BlockHeader = serde_json::from_value(result)?;
        Ok(header.timestamp)
    }

    async fn erc20_balance_of(&self, token: Address, holder: Address) -> Result<U256, ConnectorError> {
        let mut calldata = Vec::with_capacity(36);
        calldata.extend_from_slice(&BALANCE_OF_SELECTOR);
        calldata.extend_from_slice(&[0u8; 12]);
        calldata.extend_from_slice(holder.as_slice());
        let bytes = self.eth_call(token, &calldata).await?;
        decode_abi_uint(&bytes)
    }
}

/// Parse a hex quantity result such as `"0x1b4"`.
fn parse_quantity(value: &Value, method: &str) -> Result<u64, ConnectorError> {
    let s = value
        .as_str()
        .ok_or_else(|| ConnectorError::Decode(format!("{} result is not a string", method)))?;
    parse_hex_u64(s).map_err(|e| ConnectorError::Decode(format!("{} result '{}': {}", method, s, e)))
}

/// Decode a single ABI-encoded uint256 return value.
pub(crate) fn decode_abi_uint(bytes: &[u8]) -> Result<U256, ConnectorError> {
    if bytes.len() < 32 {
        return Err(ConnectorError::Decode(format!(
            "expected a 32-byte uint return value, got {} bytes",
            bytes.len()
        )));
    }
    Ok(U256::from_be_slice(&bytes[0..32]))
}

/// ABI offsets and lengths; anything that does not fit in 32 bits is garbage.
fn small_usize(value: U256) -> Option<usize> {
    if value > U256::from(u32::MAX) {
        return None;
    }
    usize::try_from(value.as_limbs()[0]).ok()
}

/// Decode an ABI-encoded `string` return value.
///
/// Some older tokens return `bytes32` instead; that shape is accepted too
/// (trailing zero bytes trimmed).
pub(crate) fn decode_abi_string(bytes: &[u8]) -> Option<String> {
    if bytes.len() == 32 {
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(32);
        return String::from_utf8(bytes[..end].to_vec()).ok();
    }
    if bytes.len() < 64 {
        return None;
    }
    let offset = small_usize(U256::from_be_slice(&bytes[0..32]))?;
    let len_end = offset.checked_add(32)?;
    let len = small_usize(U256::from_be_slice(bytes.get(offset..len_end)?))?;
    let data = bytes.get(len_end..len_end.checked_add(len)?)?;
    String::from_utf8(data.to_vec()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abi_string(s: &str) -> Vec<u8> {
        let mut out = vec![0u8; 64];
        out[31] = 0x20;
        out[63] = s.len() as u8;
        let mut data = s.as_bytes().to_vec();
        data.resize(s.len().div_ceil(32) * 32, 0);
        out.extend_from_slice(&data);
        out
    }

    #[test]
    fn test_address_formatting() {
        let addr_bytes = hex::decode("0742d35Cc6634C0532925a3b844Bc9e7595f0bEb").unwrap();
        let addr = Address::from_slice(&addr_bytes);
        assert_eq!(format!("0x{:x}", addr), "0x0742d35cc6634c0532925a3b844bc9e7595f0beb");
    }

    #[test]
    fn test_decode_abi_string() {
        assert_eq!(decode_abi_string(&abi_string("Meeds Token")).as_deref(), Some("Meeds Token"));
        assert_eq!(decode_abi_string(&abi_string("")).as_deref(), Some(""));
        assert_eq!(decode_abi_string(&[]), None);
        // Truncated payload
        let mut truncated = abi_string("MEED");
        truncated.truncate(70);
        assert_eq!(decode_abi_string(&truncated), None);
    }

    #[test]
    fn test_decode_bytes32_symbol() {
        let mut raw = [0u8; 32];
        raw[..3].copy_from_slice(b"MKR");
        assert_eq!(decode_abi_string(&raw).as_deref(), Some("MKR"));
    }

    #[test]
    fn test_decode_abi_uint() {
        let mut raw = [0u8; 32];
        raw[31] = 18;
        assert_eq!(decode_abi_uint(&raw).unwrap(), U256::from(18u64));
        assert!(matches!(decode_abi_uint(&raw[..4]), Err(ConnectorError::Decode(_))));
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(&json!("0x89"), "eth_chainId").unwrap(), 137);
        assert!(matches!(
            parse_quantity(&json!(12), "eth_blockNumber"),
            Err(ConnectorError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connectivity_error() {
        // Nothing listens on port 9 of the loopback interface
        let rpc = RpcClient::new("http://127.0.0.1:9".to_string(), Duration::from_millis(500)).unwrap();
        match rpc.block_number().await {
            Err(ConnectorError::Connectivity(_)) => {}
            other => panic!("expected connectivity error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timed_out_request_is_connectivity_error() {
        // Accepts the connection but never answers
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let server = std::thread::spawn(move || {
            let _conn = listener.accept();
            let _ = done_rx.recv_timeout(Duration::from_secs(10));
        });

        let rpc = RpcClient::new(url, Duration::from_millis(200)).unwrap();
        let result = rpc.block_number().await;
        drop(done_tx);
        server.join().unwrap();

        match result {
            Err(e @ ConnectorError::Connectivity(_)) => assert!(e.is_retryable()),
            other => panic!("expected connectivity error, got {:?}", other),
        }
    }
}
