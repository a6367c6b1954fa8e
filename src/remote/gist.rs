//! GitHub Gist backend: one gist is the collection, its files are documents.
//!
//! The gist API inlines file bodies in `GET /gists/{id}` but truncates bodies
//! above roughly one megabyte; truncated files are read back through their
//! `raw_url`. The collection revision is the gist's newest history version.
//! GitHub has no conditional PATCH, so a conditional replace re-reads the
//! version immediately before patching. That narrows the read-then-write
//! window but cannot close it.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::RemoteError;

use super::{DocumentStore, Listing};

const API_VERSION: &str = "2022-11-28";

/// Connection settings for [`GistDocumentStore`].
#[derive(Debug, Clone)]
pub struct GistConfig {
    /// API root, `https://api.github.com` unless testing against a mock.
    pub api_url: String,
    pub gist_id: String,
    /// Personal access token sent as a bearer credential.
    pub token: String,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct GistResponse {
    #[serde(default)]
    files: BTreeMap<String, Option<GistFile>>,
    #[serde(default)]
    history: Vec<GistHistory>,
}

#[derive(Debug, Deserialize)]
struct GistFile {
    content: Option<String>,
    #[serde(default)]
    truncated: bool,
    raw_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GistHistory {
    version: String,
}

impl GistResponse {
    fn revision(&self) -> Option<String> {
        self.history.first().map(|entry| entry.version.clone())
    }
}

/// Blocking client for one gist.
pub struct GistDocumentStore {
    client: Client,
    gist_url: String,
    token: String,
}

impl GistDocumentStore {
    pub fn new(config: GistConfig) -> Result<Self, RemoteError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("enviro_readings/", env!("CARGO_PKG_VERSION"))),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| RemoteError::Unavailable(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            gist_url: format!("{}/gists/{}", config.api_url.trim_end_matches('/'), config.gist_id),
            token: config.token,
        })
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        request
            .bearer_auth(&self.token)
            .send()
            .and_then(Response::error_for_status)
            .map_err(|e| RemoteError::Unavailable(e.to_string()))
    }

    fn get_gist(&self) -> Result<GistResponse, RemoteError> {
        debug!(url = %self.gist_url, "fetching gist");
        self.send(self.client.get(&self.gist_url))?
            .json()
            .map_err(|e| RemoteError::Unavailable(format!("decoding gist: {}", e)))
    }

    fn fetch_raw(&self, raw_url: &str) -> Result<String, RemoteError> {
        debug!(url = %raw_url, "fetching truncated gist file");
        self.send(self.client.get(raw_url))?
            .text()
            .map_err(|e| RemoteError::Unavailable(format!("reading raw file: {}", e)))
    }
}

impl DocumentStore for GistDocumentStore {
    fn list(&self) -> Result<Listing, RemoteError> {
        let gist = self.get_gist()?;
        let revision = gist.revision();

        let documents = gist
            .files
            .into_iter()
            .filter_map(|(name, file)| {
                let file = file?;
                let body = if file.truncated { None } else { file.content };
                Some((name, body))
            })
            .collect();

        Ok(Listing {
            revision,
            documents,
        })
    }

    fn fetch(&self, name: &str) -> Result<String, RemoteError> {
        let mut gist = self.get_gist()?;
        let file = gist
            .files
            .remove(name)
            .flatten()
            .ok_or_else(|| RemoteError::NotFound(name.to_string()))?;

        match (file.truncated, file.content, file.raw_url) {
            (false, Some(content), _) => Ok(content),
            (_, _, Some(raw_url)) => self.fetch_raw(&raw_url),
            _ => Err(RemoteError::Unavailable(format!(
                "gist file {} has neither content nor raw_url",
                name
            ))),
        }
    }

    fn replace(
        &self,
        name: &str,
        content: &str,
        expected_revision: Option<&str>,
    ) -> Result<Option<String>, RemoteError> {
        if let Some(expected) = expected_revision {
            let actual = self.get_gist()?.revision().unwrap_or_default();
            if actual != expected {
                return Err(RemoteError::Conflict {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        debug!(document = name, bytes = content.len(), "patching gist file");
        let mut files = serde_json::Map::new();
        files.insert(name.to_string(), json!({ "content": content }));
        let body = json!({ "files": files });
        let updated: GistResponse = self
            .send(self.client.patch(&self.gist_url).json(&body))?
            .json()
            .map_err(|e| RemoteError::Unavailable(format!("decoding gist: {}", e)))?;

        Ok(updated.revision())
    }
}
