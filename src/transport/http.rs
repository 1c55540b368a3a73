use crate::buffer::{EventBuffer, Pending};
use crate::config::ShipperConfig;
use crate::error::TransportError;
use crate::transport::{SendReport, Transport, TransportBase};
use async_trait::async_trait;
use reqwest::header::{CONNECTION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

pub const STACKS_ENDPOINT: &str = "stacks";
pub const LOGS_ENDPOINT: &str = "logs";

/// Batched JSON delivery over HTTP.
///
/// Stacks and logs go to two separate endpoints under the configured
/// host, each batch as one JSON array. Batches answered with 500, 502
/// or 504 are retried up to `max_retries` attempts; any other failure
/// abandons the batch.
pub struct HttpTransport {
    base: TransportBase,
    client: Option<Client>,
    batch_size: usize,
}

impl HttpTransport {
    /// Construct a transport for `config`. Call [`Transport::init`]
    /// before shipping; `send` initializes lazily otherwise.
    pub fn new(config: ShipperConfig) -> Self {
        let batch_size = config.effective_batch_size();
        Self {
            base: TransportBase::new(config),
            client: None,
            batch_size,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base.config().http_host(), path)
    }

    async fn ship(&self, client: &Client, pending: Pending) -> SendReport {
        let mut report = SendReport::default();

        for batch in pending.stacks.chunks(self.batch_size) {
            match self.post_batch(client, STACKS_ENDPOINT, batch).await {
                Ok(()) => report.stacks += batch.len(),
                Err(e) => {
                    report_failure(STACKS_ENDPOINT, batch.len(), &e);
                    report.failed_batches += 1;
                }
            }
        }

        for batch in pending.logs.chunks(self.batch_size) {
            match self.post_batch(client, LOGS_ENDPOINT, batch).await {
                Ok(()) => report.logs += batch.len(),
                Err(e) => {
                    report_failure(LOGS_ENDPOINT, batch.len(), &e);
                    report.failed_batches += 1;
                }
            }
        }

        report
    }

    async fn post_batch<T: Serialize + Sync>(
        &self,
        client: &Client,
        path: &str,
        batch: &[T],
    ) -> Result<(), TransportError> {
        let url = self.endpoint(path);
        let body = serde_json::to_vec(batch)?;
        let config = self.base.config();
        let attempts = config.max_retries.max(1);

        let mut attempt = 1;
        loop {
            match self.post_once(client, &url, body.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retriable() && attempt < attempts => {
                    let backoff = config.retry_backoff * attempt;
                    warn!(%url, attempt, "{}, retrying in {:?}", e, backoff);
                    sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_once(&self, client: &Client, url: &str, body: Vec<u8>) -> Result<(), TransportError> {
        let resp = client
            .post(url)
            .header(self.base.config().credential_header.as_str(), self.base.project_key())
            .header(CONTENT_TYPE, "application/json")
            .header(CONNECTION, "close")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::UNAUTHORIZED {
            Err(TransportError::Unauthorized)
        } else {
            let text = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            debug!(%url, %status, body = %text, "collector rejected batch");
            Err(TransportError::Status(status.as_u16()))
        }
    }

    fn ready_client(&mut self) -> Result<Client, TransportError> {
        match &self.client {
            Some(client) => Ok(client.clone()),
            None => {
                let client = build_client(self.base.config())?;
                self.client = Some(client.clone());
                Ok(client)
            }
        }
    }
}

fn build_client(config: &ShipperConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .use_rustls_tls()
        .timeout(config.request_timeout)
        .pool_max_idle_per_host(0)
        .build()
}

fn report_failure(path: &str, records: usize, e: &TransportError) {
    match e {
        TransportError::Unauthorized => {
            error!(endpoint = path, records, "project key is invalid, batch abandoned")
        }
        _ => error!(endpoint = path, records, "couldn't send batch: {}", e),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn init(&mut self) -> Result<(), TransportError> {
        self.client = Some(build_client(self.base.config())?);
        Ok(())
    }

    async fn send(&mut self, buffer: &EventBuffer) -> SendReport {
        let pending = buffer.drain();
        if pending.is_empty() {
            return SendReport::default();
        }
        match self.ready_client() {
            Ok(client) => self.ship(&client, pending).await,
            Err(e) => {
                error!("http transport unavailable, dropping {} records: {}", pending.len(), e);
                SendReport {
                    failed_batches: 1,
                    ..SendReport::default()
                }
            }
        }
    }

    async fn flush(&mut self, buffer: &EventBuffer) -> SendReport {
        let (stacks, logs) = buffer.len();
        let mut report = SendReport::default();
        if stacks == 0 && logs == 0 {
            return report;
        }

        info!(stacks, logs, "flushing stacks/logs from buffer");
        let rounds = (stacks.max(logs) + self.batch_size - 1) / self.batch_size;
        for round in 0..rounds {
            let pending = buffer.drain_up_to(self.batch_size);
            match self.ready_client() {
                Ok(client) => report += self.ship(&client, pending).await,
                Err(e) => {
                    error!("http transport unavailable, dropping {} records: {}", pending.len(), e);
                    report.failed_batches += 1;
                }
            }
            info!("flush progress {}%", 100 * (round + 1) / rounds);
        }

        if !buffer.is_empty() {
            report += self.send(buffer).await;
        }
        report
    }

    fn get_option(&self, key: &str) -> Option<serde_json::Value> {
        self.base.get_option(key)
    }
}
