use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use url::Url;

use super::DataSource;
use crate::config::SheetsConfig;
use crate::error::{Error, Result};

/// Credential chosen once when the client is built.
#[derive(Debug, Clone)]
enum Auth {
    /// Service credential, sent as `Authorization: Bearer`.
    Bearer(String),
    /// Public read key, sent as `?key=`.
    ApiKey(String),
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Google Sheets `values.get` client.
#[derive(Debug, Clone)]
pub struct SheetsClient {
    client: Client,
    base: Url,
    spreadsheet_id: Option<String>,
    auth: Option<Auth>,
}

impl SheetsClient {
    /// Builds even without credentials; reads then fail with a configuration error.
    pub fn new(cfg: &SheetsConfig) -> Result<Self> {
        let base = Url::parse(&cfg.base_url).map_err(|e| {
            Error::Config(format!("invalid sheets base url {}: {}", cfg.base_url, e))
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("building http client: {}", e)))?;
        let auth = match (&cfg.access_token, &cfg.api_key) {
            (Some(token), _) => Some(Auth::Bearer(token.clone())),
            (None, Some(key)) => Some(Auth::ApiKey(key.clone())),
            (None, None) => None,
        };
        Ok(Self {
            client,
            base,
            spreadsheet_id: cfg.spreadsheet_id.clone(),
            auth,
        })
    }

    /// `{base}/v4/spreadsheets/{id}/values/{range}` with the range as one encoded segment.
    fn values_url(&self, range: &str) -> Result<Url> {
        let id = self
            .spreadsheet_id
            .as_deref()
            .ok_or_else(|| Error::Config("SPREADSHEET_ID is not set".into()))?;
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("sheets base url {} has no path", self.base)))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", id, "values", range]);
        url.query_pairs_mut()
            .append_pair("valueRenderOption", "UNFORMATTED_VALUE");
        if let Some(Auth::ApiKey(key)) = &self.auth {
            url.query_pairs_mut().append_pair("key", key);
        }
        Ok(url)
    }
}

#[async_trait]
impl DataSource for SheetsClient {
    #[tracing::instrument(level = "info", skip(self))]
    async fn get_range(&self, range: &str) -> Result<Vec<Vec<Value>>> {
        let auth = self.auth.as_ref().ok_or_else(|| {
            Error::Config("neither GOOGLE_ACCESS_TOKEN nor GOOGLE_API_KEY is set".into())
        })?;
        let url = self.values_url(range)?;
        debug!(%url, "GET range");

        let start = Instant::now();
        let mut req = self.client.get(url);
        if let Auth::Bearer(token) = auth {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(300).collect();
            return Err(Error::Upstream(format!(
                "{} returned {}: {}",
                range, status, snippet
            )));
        }
        let body: ValueRange = resp.json().await?;
        info!(rows = body.values.len(), elapsed = ?start.elapsed(), "fetched range");
        Ok(body.values)
    }
}
