//! HTTP event log collaborator (`POST {base_url}/events`)

use super::{EventLogSink, EventRecord, EVENT_LOG_TIMEOUT};
use crate::error::{Error, Result};
use async_trait::async_trait;

pub struct HttpEventLog {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEventLog {
    pub fn new(base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(EVENT_LOG_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl EventLogSink for HttpEventLog {
    async fn write(&self, record: &EventRecord) -> Result<()> {
        let url = format!("{}/events", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(record)
            .send()
            .await
            .map_err(|e| Error::EventLog(format!("POST {} failed: {}", url, e)))?;

        if !resp.status().is_success() {
            return Err(Error::EventLog(format!(
                "event rejected: HTTP {}",
                resp.status().as_u16()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
