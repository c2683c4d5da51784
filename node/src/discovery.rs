//! Client for the authority's REST surface.

use crate::Error;
use anchor_ledger::{
    artifact::DeployedContract,
    wire::{ErrorResponse, FaucetRequest, FaucetResponse, Status},
};
use ethers::types::Address;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::trace;

/// Issues single requests to an authority. Retries are left to the caller.
#[derive(Clone)]
pub struct Discovery {
    http: reqwest::Client,
    base: String,
}

impl Discovery {
    /// Create a new [Discovery] for the authority at `base`.
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let base = base.into().trim_end_matches('/').to_string();
        Ok(Self { http, base })
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, Error> {
        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorResponse>().await {
                Ok(body) => body.error,
                Err(_) => status.to_string(),
            };
            return Err(Error::Authority {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json()
            .await
            .map_err(|err| Error::InvalidResponse(err.to_string()))
    }

    /// `GET /status`
    pub async fn status(&self) -> Result<Status, Error> {
        trace!(base = self.base.as_str(), "polling status");
        let response = self.http.get(format!("{}/status", self.base)).send().await?;
        Self::decode(response).await
    }

    /// `POST /faucet`
    pub async fn request_funds(&self, address: Address) -> Result<FaucetResponse, Error> {
        let response = self
            .http
            .post(format!("{}/faucet", self.base))
            .json(&FaucetRequest { address })
            .send()
            .await?;
        Self::decode(response).await
    }

    /// `GET /contract`
    pub async fn contract(&self) -> Result<DeployedContract, Error> {
        let response = self
            .http
            .get(format!("{}/contract", self.base))
            .send()
            .await?;
        Self::decode(response).await
    }
}
