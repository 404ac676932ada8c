//! Search provider adapter.
//!
//! Wraps the external search API behind the `SearchApi` trait. The adapter
//! never surfaces an error to callers: missing credentials, transport
//! failures, and non-success statuses all log and return an empty result
//! list.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{error, warn};

use crate::settings::SearchSettings;

/// Which vertical to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    General,
    Scholar,
    Social,
}

impl SearchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchKind::General => "general",
            SearchKind::Scholar => "scholar",
            SearchKind::Social => "social",
        }
    }

    fn path(&self) -> &'static str {
        match self {
            SearchKind::General => "search",
            SearchKind::Scholar => "scholar",
            SearchKind::Social => "news",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub link: String,
}

#[async_trait]
pub trait SearchApi: Send + Sync {
    async fn search(&self, query: &str, kind: SearchKind) -> Vec<SearchResult>;
}

/// Merge new results into prior ones, deduplicating by title. The first
/// occurrence of a title wins; only previously-unseen items are appended.
pub fn merge_results(
    mut existing: Vec<SearchResult>,
    new: Vec<SearchResult>,
) -> Vec<SearchResult> {
    let mut seen: HashSet<String> = existing.iter().map(|r| r.title.clone()).collect();
    for result in new {
        if seen.insert(result.title.clone()) {
            existing.push(result);
        }
    }
    existing
}

#[derive(Serialize)]
struct WireQuery<'a> {
    q: &'a str,
    num: usize,
}

#[derive(Deserialize)]
struct WireResults {
    #[serde(default)]
    organic: Vec<SearchResult>,
}

/// Production search client.
pub struct HttpSearchClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    result_count: usize,
}

impl HttpSearchClient {
    pub fn new(settings: &SearchSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.endpoint.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            result_count: settings.result_count,
        })
    }
}

#[async_trait]
impl SearchApi for HttpSearchClient {
    async fn search(&self, query: &str, kind: SearchKind) -> Vec<SearchResult> {
        let Some(api_key) = &self.api_key else {
            warn!("search API key not configured, {} search disabled", kind.as_str());
            return vec![];
        };

        let url = format!("{}/{}", self.base_url, kind.path());
        let body = WireQuery { q: query, num: self.result_count };

        let response = match self
            .client
            .post(&url)
            .header("X-API-KEY", api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("{} search transport error: {}", kind.as_str(), e);
                return vec![];
            }
        };

        if !response.status().is_success() {
            error!(
                "{} search failed with status {}",
                kind.as_str(),
                response.status()
            );
            return vec![];
        }

        match response.json::<WireResults>().await {
            Ok(results) => results.organic,
            Err(e) => {
                error!("{} search returned malformed body: {}", kind.as_str(), e);
                vec![]
            }
        }
    }
}
