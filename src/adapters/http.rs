use crate::domain::model::{Lease, ParseResult, SourceKind};
use crate::domain::ports::Parser;
use crate::utils::error::{Result, ScrapeError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const PROFILE_HEADER: &str = "X-Profile-Id";
const CAPTCHA_MARKER: &str = "captcha_required";

#[derive(Debug, Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
}

/// Envelope returned by the scraper worker.
#[derive(Debug, Deserialize)]
struct ScraperResponse {
    #[serde(default)]
    success: bool,
    data: Option<ParseResult>,
    error: Option<String>,
}

/// Parser that delegates the browser work to a remote scraper worker.
///
/// `POST {endpoint}/parse/{kind}` with `{"url": ...}` and the leased profile
/// in the `X-Profile-Id` header.
#[derive(Debug, Clone)]
pub struct HttpParser {
    client: Client,
    endpoint: String,
}

impl HttpParser {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn parse_url(&self, kind: SourceKind) -> String {
        format!("{}/parse/{}", self.endpoint, kind)
    }
}

fn error_from_message(message: Option<String>, fallback: String) -> ScrapeError {
    match message {
        Some(msg) if msg.trim() == CAPTCHA_MARKER => ScrapeError::CaptchaRequired,
        Some(msg) if !msg.trim().is_empty() => ScrapeError::Failed { message: msg },
        _ => ScrapeError::Failed { message: fallback },
    }
}

#[async_trait]
impl Parser for HttpParser {
    async fn run(
        &self,
        kind: SourceKind,
        url: &str,
        lease: &Lease,
    ) -> std::result::Result<ParseResult, ScrapeError> {
        let target = self.parse_url(kind);
        tracing::debug!(%target, profile = %lease, "Calling scraper worker");

        let response = self
            .client
            .post(&target)
            .header(PROFILE_HEADER, lease.to_string())
            .json(&ScrapeRequest { url })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScrapeError::failed(format!("Scraper worker timed out: {}", e))
                } else {
                    ScrapeError::failed(format!("Scraper worker unreachable: {}", e))
                }
            })?;

        let status = response.status();
        tracing::debug!("Scraper response status: {}", status);

        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ScrapeError::CaptchaRequired);
        }

        let body = response
            .text()
            .await
            .map_err(|e| ScrapeError::failed(format!("Failed to read scraper response: {}", e)))?;
        let envelope = serde_json::from_str::<ScraperResponse>(&body);

        if !status.is_success() {
            let message = envelope.ok().and_then(|env| env.error);
            return Err(error_from_message(
                message,
                format!("Scraper worker returned status {}", status),
            ));
        }

        let envelope = envelope.map_err(|e| {
            ScrapeError::failed(format!("Malformed scraper response: {}", e))
        })?;

        match envelope {
            ScraperResponse {
                success: true,
                data: Some(data),
                ..
            } => Ok(data),
            ScraperResponse { error, .. } => Err(error_from_message(
                error,
                "Scraper worker reported failure without a message".to_string(),
            )),
        }
    }
}
