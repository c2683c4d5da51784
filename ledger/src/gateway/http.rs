//! JSON-RPC 2.0 over HTTP.

use super::{Receipt, Rpc};
use crate::Error;
use ethers::types::{
    Address, Bytes, TransactionReceipt, TransactionRequest, H256, U256, U64,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::trace;

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

#[derive(Deserialize)]
struct ErrorObject {
    code: i64,
    message: String,
}

/// An [Rpc] that talks to a ledger endpoint over HTTP.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    url: String,
    next_id: Arc<AtomicU64>,
}

impl Client {
    /// Create a new [Client] for `url`. Each request is abandoned after `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(id, method, "sending request");
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let response = self.http.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        let response: Response = serde_json::from_slice(&body)
            .map_err(|err| Error::InvalidResponse(format!("{method}: {err}")))?;
        if let Some(error) = response.error {
            return Err(Error::Rejected {
                code: error.code,
                message: error.message,
            });
        }
        let result = response.result.unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map_err(|err| Error::InvalidResponse(format!("{method}: {err}")))
    }
}

impl Rpc for Client {
    async fn accounts(&self) -> Result<Vec<Address>, Error> {
        self.request("eth_accounts", json!([])).await
    }

    async fn chain_id(&self) -> Result<u64, Error> {
        let id: U64 = self.request("eth_chainId", json!([])).await?;
        Ok(id.as_u64())
    }

    async fn balance(&self, address: Address) -> Result<U256, Error> {
        self.request("eth_getBalance", json!([address, "latest"]))
            .await
    }

    async fn transaction_count(&self, address: Address) -> Result<U256, Error> {
        self.request("eth_getTransactionCount", json!([address, "latest"]))
            .await
    }

    async fn estimate_gas(&self, request: TransactionRequest) -> Result<U256, Error> {
        self.request("eth_estimateGas", json!([request])).await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, Error> {
        self.request("eth_sendRawTransaction", json!([raw])).await
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<Receipt>, Error> {
        let receipt: Option<TransactionReceipt> = self
            .request("eth_getTransactionReceipt", json!([hash]))
            .await?;
        Ok(receipt.map(Receipt::from))
    }

    async fn call(&self, request: TransactionRequest) -> Result<Bytes, Error> {
        self.request("eth_call", json!([request, "latest"])).await
    }
}
