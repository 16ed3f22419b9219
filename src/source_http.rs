//! # HTTP Source
//!
//! Blocking HTTP implementation of the source-system boundary. The source
//! exposes a paginated query endpoint returning JSON arrays of rows for a
//! (start, end) window, plus a row-count endpoint used only by the
//! empty-window safety check. Each run is a single-threaded pipeline, so a
//! blocking client with per-request timeouts is all the concurrency needed.

use crate::config::SourceConfig;
use crate::extract::{Page, RecordSource, SourceError, SourceProbe};
use crate::temporal::Interval;
use anyhow::Result;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use std::time::Duration;

const USER_AGENT: &str = concat!("worksync/", env!("CARGO_PKG_VERSION"));

/// Shape of the row-count probe response
#[derive(Debug, serde::Deserialize)]
struct CountResponse {
    count: u64,
}

pub struct HttpSource {
    client: Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: config.bearer_token.clone(),
        })
    }

    fn get(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::blocking::Response, SourceError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.client.get(&url).query(query);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(|err| {
            if err.is_timeout() {
                SourceError::Timeout(url.clone())
            } else {
                SourceError::Unreachable(err.to_string())
            }
        })?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(SourceError::Auth(format!("{} -> {}", url, response.status())))
            }
            status if !status.is_success() => {
                Err(SourceError::Unreachable(format!("{} -> {}", url, status)))
            }
            _ => Ok(response),
        }
    }
}

impl RecordSource for HttpSource {
    fn fetch_page(
        &mut self,
        window: Interval,
        offset: u64,
        limit: u64,
    ) -> Result<Page, SourceError> {
        let query = [
            ("start", window.start.to_string()),
            ("end", window.end.to_string()),
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ];
        let response = self.get("records", &query)?;
        let rows: Vec<serde_json::Value> = response
            .json()
            .map_err(|err| SourceError::BadPayload(err.to_string()))?;

        Ok(Page {
            // The source signals the final page by underfilling it
            has_more: rows.len() as u64 == limit,
            rows,
        })
    }

    fn probe(&mut self, window: Interval) -> Result<SourceProbe, SourceError> {
        let query = [
            ("start", window.start.to_string()),
            ("end", window.end.to_string()),
        ];
        let response = self.get("records/count", &query)?;
        let body: CountResponse = response
            .json()
            .map_err(|err| SourceError::BadPayload(err.to_string()))?;
        Ok(SourceProbe {
            row_count: body.count,
        })
    }
}
