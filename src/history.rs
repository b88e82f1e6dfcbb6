use crate::config::Config;
use crate::error::{Result, ViewerError};
use crate::log_entry::{parse_line, LogRecord};
use log::{debug, info};
use reqwest::StatusCode;

/// Fetches the most recent backend lines from the admin log endpoint.
#[derive(Debug, Clone)]
pub struct HistoryLoader {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HistoryLoader {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.history_url(),
            token: config.token.clone(),
        }
    }

    /// Returns up to `limit` records, newest first.
    pub async fn fetch(&self, limit: usize) -> Result<Vec<LogRecord>> {
        debug!("Requesting {} history lines from {}", limit, self.url);

        let mut request = self.client.get(&self.url).query(&[("limit", limit)]);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ViewerError::Unauthorized(status));
        }
        if !status.is_success() {
            return Err(ViewerError::UnexpectedStatus(status));
        }

        let body = response.bytes().await?;
        let lines: Vec<String> = serde_json::from_slice(&body)?;
        info!("Loaded {} history lines", lines.len());

        Ok(parse_history(&lines))
    }
}

/// Parses oldest-first backend lines into newest-first records.
pub fn parse_history(lines: &[String]) -> Vec<LogRecord> {
    lines.iter().rev().map(|line| parse_line(line)).collect()
}
