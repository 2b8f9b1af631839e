//! Ethereum JSON-RPC chain source.
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use error_stack::{Result, ResultExt};
use ethevents_common::{
    normalize::parse_quantity,
    raw::{RawBlock, RawLog},
    IndexerError,
};
use reqwest::{header::HeaderMap, Client};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tracing::{instrument, trace};
use url::Url;

use crate::source::ChainSource;

#[derive(Debug, Clone)]
pub struct JsonRpcSourceOptions {
    /// Request timeout.
    pub timeout: Duration,
    /// Headers sent with every request.
    pub headers: HeaderMap,
}

pub struct JsonRpcSource {
    client: Client,
    url: Url,
    options: JsonRpcSourceOptions,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

impl JsonRpcSource {
    pub fn new(url: Url, options: JsonRpcSourceOptions) -> Result<Self, IndexerError> {
        let client = Client::builder()
            .timeout(options.timeout)
            .default_headers(options.headers.clone())
            .build()
            .change_context(IndexerError::Configuration)
            .attach_printable("failed to build http client")?;

        Ok(Self {
            client,
            url,
            options,
            next_id: AtomicU64::new(1),
        })
    }

    /// Sends a request and returns its result. A `null` result is returned as `None`.
    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, IndexerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        trace!(method, id, "sending json-rpc request");

        let request = self.client.post(self.url.clone()).json(&body).send();
        let Ok(response) = tokio::time::timeout(self.options.timeout, request).await else {
            return Err(IndexerError::SourceUnavailable)
                .attach_printable("json-rpc request timed out")
                .attach_printable_lazy(|| format!("method: {method}"));
        };

        let response = response
            .and_then(|response| response.error_for_status())
            .change_context(IndexerError::SourceUnavailable)
            .attach_printable("failed to send json-rpc request")
            .attach_printable_lazy(|| format!("method: {method}"))?;

        let response = response
            .json::<JsonRpcResponse<T>>()
            .await
            .change_context(IndexerError::MalformedInput)
            .attach_printable("failed to decode json-rpc response")
            .attach_printable_lazy(|| format!("method: {method}"))?;

        if let Some(error) = response.error {
            return Err(IndexerError::SourceUnavailable)
                .attach_printable("json-rpc request failed")
                .attach_printable_lazy(|| format!("method: {method}"))
                .attach_printable_lazy(|| format!("error: {} ({})", error.message, error.code));
        }

        Ok(response.result)
    }
}

#[async_trait]
impl ChainSource for JsonRpcSource {
    #[instrument(skip(self), err(Debug))]
    async fn get_block(&self, height: u64) -> Result<Option<RawBlock>, IndexerError> {
        let params = json!([format!("0x{height:x}"), true]);
        let Some(mut block) = self
            .request::<RawBlock>("eth_getBlockByNumber", params)
            .await?
        else {
            return Ok(None);
        };

        let Some(hash) = block.hash.clone() else {
            // Let the normalizer report the missing hash.
            return Ok(Some(block));
        };

        let logs = self
            .request::<Vec<RawLog>>("eth_getLogs", json!([{ "blockHash": hash }]))
            .await?
            .unwrap_or_default();
        block.logs = logs;

        Ok(Some(block))
    }

    #[instrument(skip(self), err(Debug))]
    async fn get_tip(&self) -> Result<u64, IndexerError> {
        let tip = self
            .request::<String>("eth_blockNumber", json!([]))
            .await?
            .ok_or(IndexerError::MalformedInput)
            .attach_printable("eth_blockNumber returned null")?;

        parse_quantity(&tip)
    }
}

impl Default for JsonRpcSourceOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            headers: HeaderMap::default(),
        }
    }
}
