//! HTTP request service client
//!
//! Talks JSON to the request service. The search endpoint streams
//! newline-delimited JSON, one filesystem request per line, ascending by
//! resource version.

use crate::domain::ports::{RequestService, StatusUpdate};
use crate::domain::request::FilesystemRequest;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// NDJSON Decoding
// =============================================================================

/// Splits a chunked byte stream into lines
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: BytesMut,
}

impl NdjsonDecoder {
    /// Append a chunk as received from the wire
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete, non-blank line, if one is buffered
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let end = self.buffer.iter().position(|b| *b == b'\n')?;
            let line = self.buffer.split_to(end + 1);
            let text = String::from_utf8_lossy(&line[..end]).trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }

    /// Whatever is left once the body ended without a final newline
    pub fn finish(&mut self) -> Option<String> {
        let rest = self.buffer.split();
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

fn decode_request(line: &str) -> Result<FilesystemRequest> {
    Ok(serde_json::from_str(line)?)
}

// =============================================================================
// Client
// =============================================================================

/// Request service reached over HTTP
pub struct HttpRequestService {
    client: Client,
    base_url: String,
}

impl HttpRequestService {
    /// Client whose every exchange, streamed body included, ends after
    /// `timeout`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn filesystem_url(&self, tenant: &str, name: &str, leaf: &str) -> String {
        format!(
            "{}/v1/filesystems/{}/{}/{}",
            self.base_url,
            urlencoding::encode(tenant),
            urlencoding::encode(name),
            leaf
        )
    }
}

/// Turn a non-success response into an error carrying the body text
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(Error::RequestService {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl RequestService for HttpRequestService {
    async fn search_filesystem_requests(
        &self,
        availability_zone: &str,
        min_resource_version: u64,
    ) -> Result<BoxStream<'static, Result<FilesystemRequest>>> {
        let url = format!("{}/v1/filesystems/requests", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("availabilityZone", availability_zone.to_string()),
                ("resourceVersion", min_resource_version.to_string()),
            ])
            .send()
            .await?;
        let response = check_status(response).await?;
        debug!(url = %url, min_resource_version, "request stream opened");

        let body = response.bytes_stream().boxed();
        let lines = stream::unfold(
            (body, NdjsonDecoder::default(), false),
            |(mut body, mut decoder, mut ended)| async move {
                loop {
                    if let Some(line) = decoder.next_line() {
                        return Some((decode_request(&line), (body, decoder, ended)));
                    }
                    if ended {
                        return decoder
                            .finish()
                            .map(|line| (decode_request(&line), (body, decoder, true)));
                    }
                    match body.next().await {
                        Some(Ok(chunk)) => decoder.push(&chunk),
                        Some(Err(e)) => {
                            // Nothing after a transport error can be trusted
                            let err = Error::RequestStream(e.to_string());
                            return Some((Err(err), (body, NdjsonDecoder::default(), true)));
                        }
                        None => ended = true,
                    }
                }
            },
        );

        Ok(lines.boxed())
    }

    async fn remove_finalizer(&self, tenant: &str, name: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.filesystem_url(tenant, name, "finalizer"))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn update_status(&self, update: &StatusUpdate) -> Result<()> {
        let response = self
            .client
            .put(self.filesystem_url(&update.tenant, &update.name, "status"))
            .json(update)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/v1/ping", self.base_url))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}
