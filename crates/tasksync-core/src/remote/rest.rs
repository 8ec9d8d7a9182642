//! REST client for a Realtime-Database style JSON tree.
//!
//! Every path maps to `{base_url}/{path}.json`. Reads are `GET`, writes are
//! `PUT`, deletes are `DELETE`. Listeners open a server-sent event stream on
//! the path and re-read it after each `put`/`patch` event, so callbacks for
//! one path always arrive in the order the server applied the changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Client, Response};
use serde_json::Value;
use tracing::{debug, warn};

use super::{RemoteStore, SnapshotCallback, Subscription};
use crate::error::{Result, SyncError};

/// Timeout for establishing a connection, used by the streaming client
/// which cannot have an overall request timeout.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Content type requested for listener streams
const EVENT_STREAM: &str = "text/event-stream";

/// Remote store client over HTTPS.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct RestRemoteStore {
    client: Client,
    stream_client: Client,
    base_url: String,
    auth_token: Option<Arc<String>>,
}

impl RestRemoteStore {
    /// Create a client rooted at `base_url` with the given request timeout.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        let stream_client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            stream_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: None,
        })
    }

    /// Create a new client with the given token, sharing the connection pool.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            client: self.client.clone(),
            stream_client: self.stream_client.clone(),
            base_url: self.base_url.clone(),
            auth_token: Some(Arc::new(token.into())),
        }
    }

    fn url(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        match self.auth_token {
            Some(ref token) => format!("{}/{}.json?auth={}", self.base_url, path, token),
            None => format!("{}/{}.json", self.base_url, path),
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(SyncError::from_status(status, &body))
        }
    }

    async fn get_value(client: &Client, url: &str) -> Result<Option<Value>> {
        let response = client
            .get(url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        let value: Value = response.json().await?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    /// Consume an event stream, re-reading the path after each data event.
    async fn pump_events(
        stream_client: Client,
        client: Client,
        url: String,
        path: String,
        callback: SnapshotCallback,
        active: Arc<AtomicBool>,
    ) -> Result<()> {
        let response = stream_client
            .get(&url)
            .header(header::ACCEPT, EVENT_STREAM)
            .send()
            .await?;
        let response = Self::check_response(response).await?;

        let mut stream = response.bytes_stream();
        let mut buffer = EventBuffer::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;

            for block in buffer.push(&chunk) {
                let event = parse_event_name(&block);
                match event.as_deref() {
                    Some("put") | Some("patch") => {
                        let snapshot = Self::get_value(&client, &url).await?;
                        if !active.load(Ordering::SeqCst) {
                            return Ok(());
                        }
                        callback(snapshot);
                    }
                    Some("keep-alive") | None => {}
                    Some("cancel") => {
                        return Err(SyncError::AccessDenied(format!("listener on {} cancelled by server", path)));
                    }
                    Some("auth_revoked") => return Err(SyncError::Unauthorized),
                    Some(other) => debug!(path = %path, event = other, "Ignoring stream event"),
                }
            }
        }
        Ok(())
    }
}

/// Raw stream bytes waiting for a blank line. Chunks may end inside a
/// multibyte character or between the `\r` and `\n` of a CRLF pair, so
/// nothing is decoded until a whole block has arrived.
#[derive(Debug, Default)]
struct EventBuffer {
    bytes: Vec<u8>,
}

impl EventBuffer {
    /// Append a chunk and return every block it completed, oldest first.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        for &byte in chunk {
            // CRLF becomes LF
            if byte == b'\n' && self.bytes.last() == Some(&b'\r') {
                self.bytes.pop();
            }
            self.bytes.push(byte);
        }

        let mut blocks = Vec::new();
        while let Some(end) = self.bytes.windows(2).position(|pair| pair == b"\n\n") {
            let block: Vec<u8> = self.bytes.drain(..end + 2).collect();
            blocks.push(String::from_utf8_lossy(&block).into_owned());
        }
        blocks
    }
}

/// Extract the `event:` name from one server-sent event block.
fn parse_event_name(block: &str) -> Option<String> {
    block
        .lines()
        .find_map(|line| line.strip_prefix("event:"))
        .map(|name| name.trim().to_string())
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn write(&self, path: &str, value: Value) -> Result<()> {
        let url = self.url(path);
        let response = self.client.put(&url).json(&value).send().await?;
        Self::check_response(response).await?;
        debug!(path, "remote write acknowledged");
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let url = self.url(path);
        let response = self.client.delete(&url).send().await?;
        Self::check_response(response).await?;
        debug!(path, "remote delete acknowledged");
        Ok(())
    }

    async fn read_once(&self, path: &str) -> Result<Option<Value>> {
        Self::get_value(&self.client, &self.url(path)).await
    }

    fn subscribe(&self, path: &str, callback: SnapshotCallback) -> Result<Subscription> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SyncError::NotAllowed("subscribe needs a tokio runtime".to_string()))?;

        let active = Arc::new(AtomicBool::new(true));
        let task = runtime.spawn({
            let stream_client = self.stream_client.clone();
            let client = self.client.clone();
            let url = self.url(path);
            let path = path.to_string();
            let active = Arc::clone(&active);
            async move {
                if let Err(e) =
                    Self::pump_events(stream_client, client, url, path.clone(), callback, active).await
                {
                    // No automatic reconnect; the next subscribe starts a fresh stream.
                    warn!(path = %path, error = %e, "Listener stream ended with error");
                }
            }
        });

        let disposed_path = path.to_string();
        Ok(Subscription::new(path, move || {
            active.store(false, Ordering::SeqCst);
            task.abort();
            debug!(path = %disposed_path, "remote listener disposed");
        }))
    }
}
