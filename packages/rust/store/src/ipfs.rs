//! Content store backed by an IPFS (Kubo) daemon's HTTP RPC API.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use feedgraph_shared::{ContentId, FeedGraphError, Result};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::{BlobStream, ContentStore, NodeOptions};

/// Timeout for a single RPC call. Blob uploads can be large, so this is generous.
const RPC_TIMEOUT: Duration = Duration::from_secs(300);

const USER_AGENT: &str = concat!("feedgraph/", env!("CARGO_PKG_VERSION"));

#[derive(Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Deserialize)]
struct DagPutResponse {
    #[serde(rename = "Cid")]
    cid: ContentId,
}

#[derive(Deserialize)]
struct RpcError {
    #[serde(rename = "Message")]
    message: String,
}

/// Talks to `<api_url>/api/v0/*`.
#[derive(Debug, Clone)]
pub struct IpfsHttpStore {
    client: Client,
    api_url: String,
    pin: bool,
}

impl IpfsHttpStore {
    pub fn new(api_url: &str, pin: bool) -> Result<Self> {
        let api_url = api_url.trim().trim_end_matches('/').to_string();
        if api_url.is_empty() {
            return Err(FeedGraphError::config("store api_url must not be empty"));
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|e| FeedGraphError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url,
            pin,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn endpoint(&self, command: &str) -> String {
        format!("{}/api/v0/{command}", self.api_url)
    }

    /// POST an RPC command and return the successful response body.
    async fn call(
        &self,
        command: &str,
        query: &[(&str, String)],
        form: Option<Form>,
    ) -> Result<Bytes> {
        let mut request = self.client.post(self.endpoint(command)).query(query);
        if let Some(form) = form {
            request = request.multipart(form);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FeedGraphError::Store(format!("{command}: {}", error_chain(&e))))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| FeedGraphError::Store(format!("{command}: failed to read response: {e}")))?;

        if !status.is_success() {
            let message = serde_json::from_slice::<RpcError>(&body)
                .map(|err| err.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).trim().to_string());
            return Err(FeedGraphError::Store(format!(
                "{command}: HTTP {status}: {message}"
            )));
        }

        Ok(body)
    }
}

/// `reqwest` keeps the cause of a failed upload (such as an aborted body
/// stream) in the source chain, not in its own message.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn decode<'a, T: Deserialize<'a>>(command: &str, body: &'a [u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| FeedGraphError::Store(format!("{command}: unexpected response: {e}")))
}

#[async_trait]
impl ContentStore for IpfsHttpStore {
    #[instrument(skip_all)]
    async fn put_blob(&self, body: BlobStream) -> Result<ContentId> {
        let part = Part::stream(Body::wrap_stream(body)).file_name("blob");
        let form = Form::new().part("file", part);
        let query = [
            ("pin", self.pin.to_string()),
            ("cid-version", "1".to_string()),
            ("quieter", "true".to_string()),
        ];

        let body = self.call("add", &query, Some(form)).await?;
        let added: AddResponse = decode("add", &body)?;
        let id: ContentId = added.hash.parse()?;

        debug!(cid = %id, "blob stored");
        Ok(id)
    }

    #[instrument(skip_all, fields(bytes = json.len(), codec = %options.store_codec()))]
    async fn put_node(&self, json: &[u8], options: &NodeOptions) -> Result<ContentId> {
        let form = Form::new().part("file", Part::bytes(json.to_vec()).file_name("node.json"));
        let query = [
            ("store-codec", options.store_codec()),
            ("input-codec", options.input_codec()),
            ("hash", options.hash.to_string()),
            ("pin", self.pin.to_string()),
        ];

        let body = self.call("dag/put", &query, Some(form)).await?;
        let put: DagPutResponse = decode("dag/put", &body)?;

        debug!(cid = %put.cid, "node stored");
        Ok(put.cid)
    }

    #[instrument(skip_all, fields(cid = %id))]
    async fn get_node(&self, id: &ContentId) -> Result<serde_json::Value> {
        let query = [
            ("arg", id.to_string()),
            ("output-codec", "dag-json".to_string()),
        ];
        let body = self.call("dag/get", &query, None).await?;
        decode("dag/get", &body)
    }
}
