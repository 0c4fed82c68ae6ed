//! Client for the RDFox REST endpoint.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::supervisor::ConnectHook;

/// Connection timeout for HTTP requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const SPARQL_PATH: &str = "datastores/default/sparql";
const CONTENT_PATH: &str = "datastores/default/content";

/// Accept header for SPARQL JSON results.
pub const SPARQL_JSON: &str = "application/sparql-results+json";

/// Errors from endpoint operations.
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("Endpoint is not connected")]
    NotConnected,
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("Endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    /// RDFox rejected a query it could not parse.
    #[error("ParsingError: {message}")]
    Parsing { query: String, message: String },
    #[error("Failed to decode query results: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Something that can be pointed at a running RDFox server.
pub trait Endpoint: Send + Sync + 'static {
    /// Called once with the server's base URL when RDFox reports readiness.
    fn connect(&self, base_url: Url);
}

/// Connects an [`Endpoint`] when the readiness signal arrives.
///
/// The captured identifier is a port number or a service name; a bare port
/// becomes `http://{host}:{port}`.
pub struct EndpointConnector<E> {
    endpoint: Arc<E>,
    host: String,
}

impl<E: Endpoint> EndpointConnector<E> {
    #[must_use]
    pub fn new(endpoint: Arc<E>) -> Self {
        Self {
            endpoint,
            host: "localhost".to_string(),
        }
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Base URL for a readiness identifier.
    ///
    /// # Errors
    ///
    /// Returns `url::ParseError` if the identifier cannot form a URL.
    pub fn base_url(&self, identifier: &str) -> Result<Url, url::ParseError> {
        if identifier.contains("://") {
            Url::parse(identifier)
        } else {
            Url::parse(&format!("http://{}:{identifier}", self.host))
        }
    }
}

#[async_trait]
impl<E: Endpoint> ConnectHook for EndpointConnector<E> {
    async fn connect(&self, identifier: &str) {
        match self.base_url(identifier) {
            Ok(url) => {
                tracing::info!(url = %url, "Connecting to RDFox endpoint");
                self.endpoint.connect(url);
            }
            Err(e) => {
                tracing::error!(identifier, error = %e, "Cannot build endpoint URL");
            }
        }
    }
}

/// HTTP client for the default datastore of a running RDFox server.
#[derive(Debug)]
pub struct RestEndpoint {
    client: Client,
    base: OnceLock<Url>,
    namespaces: BTreeMap<String, String>,
}

impl Default for RestEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl RestEndpoint {
    #[must_use]
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base: OnceLock::new(),
            namespaces: BTreeMap::new(),
        }
    }

    /// Bind `prefix` to `iri` in every query sent through [`Self::query`].
    #[must_use]
    pub fn with_namespace(mut self, prefix: impl Into<String>, iri: impl Into<String>) -> Self {
        self.namespaces.insert(prefix.into(), iri.into());
        self
    }

    #[must_use]
    pub fn namespaces(&self) -> &BTreeMap<String, String> {
        &self.namespaces
    }

    #[must_use]
    pub fn base_url(&self) -> Option<&Url> {
        self.base.get()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.base.get().is_some()
    }

    fn url(&self, path: &str) -> Result<Url, EndpointError> {
        let base = self.base.get().ok_or(EndpointError::NotConnected)?;
        Ok(base.join(path)?)
    }

    /// Prepend `PREFIX` declarations for the bound namespaces.
    #[must_use]
    pub fn prepare_query(&self, query: &str) -> String {
        let mut full = String::new();
        for (prefix, iri) in &self.namespaces {
            full.push_str(&format!("PREFIX {prefix}: <{iri}>\n"));
        }
        full.push_str(query);
        full
    }

    /// Send a SPARQL query and return the raw response body.
    ///
    /// # Errors
    ///
    /// Returns `EndpointError::Parsing` if RDFox rejects the query syntax,
    /// `EndpointError::Status` for other unsuccessful responses and
    /// `EndpointError::NotConnected` before the endpoint has started.
    pub async fn query(&self, query: &str, accept: &str) -> Result<String, EndpointError> {
        let full_query = self.prepare_query(query);
        tracing::debug!(query = %full_query, "Sending query");

        let response = self
            .client
            .get(self.url(SPARQL_PATH)?)
            .query(&[("query", full_query.as_str())])
            .header(reqwest::header::ACCEPT, accept)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            tracing::debug!(bytes = body.len(), "Query result received");
            return Ok(body);
        }

        tracing::error!(status = status.as_u16(), "Query error");
        for line in body.lines() {
            tracing::error!("    {line}");
        }
        if body.contains("ParsingException") {
            for (i, line) in full_query.lines().enumerate() {
                tracing::error!("Line {}: {line}", i + 1);
            }
            return Err(EndpointError::Parsing {
                query: full_query,
                message: body,
            });
        }
        Err(EndpointError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Send a SELECT query and return one map per solution, keyed by variable.
    ///
    /// Unbound variables are left out of their row.
    ///
    /// # Errors
    ///
    /// As [`Self::query`], plus `EndpointError::Decode` for malformed results.
    pub async fn query_records(
        &self,
        query: &str,
    ) -> Result<Vec<BTreeMap<String, String>>, EndpointError> {
        let body = self.query(query, SPARQL_JSON).await?;
        parse_records(&body)
    }

    /// Fetch all derived facts in the given serialization format.
    ///
    /// # Errors
    ///
    /// Returns `EndpointError::Status` for unsuccessful responses.
    pub async fn facts(&self, format: &str) -> Result<String, EndpointError> {
        let response = self
            .client
            .get(self.url(CONTENT_PATH)?)
            .query(&[("fact-domain", "IDB")])
            .header(reqwest::header::ACCEPT, format)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        tracing::debug!(status = status.as_u16(), "Store contents response");
        check_status(status, body)
    }

    /// Add content, e.g. Turtle triples, to the datastore.
    ///
    /// # Errors
    ///
    /// Returns `EndpointError::Status` for unsuccessful responses.
    pub async fn add_content(&self, content: impl Into<String>) -> Result<(), EndpointError> {
        let response = self
            .client
            .patch(self.url(CONTENT_PATH)?)
            .query(&[("operation", "add-content")])
            .body(content.into())
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        check_status(status, body).map(|_| ())
    }
}

impl Endpoint for RestEndpoint {
    fn connect(&self, base_url: Url) {
        if self.base.set(base_url).is_err() {
            tracing::warn!("Endpoint already connected, ignoring new URL");
        }
    }
}

fn check_status(status: reqwest::StatusCode, body: String) -> Result<String, EndpointError> {
    if status.is_success() {
        Ok(body)
    } else {
        tracing::error!(status = status.as_u16(), body = %body, "Endpoint request failed");
        Err(EndpointError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[derive(Deserialize)]
struct SparqlResults {
    results: SparqlBindings,
}

#[derive(Deserialize)]
struct SparqlBindings {
    bindings: Vec<BTreeMap<String, SparqlTerm>>,
}

#[derive(Deserialize)]
struct SparqlTerm {
    value: String,
}

fn parse_records(body: &str) -> Result<Vec<BTreeMap<String, String>>, EndpointError> {
    let results: SparqlResults = serde_json::from_str(body)?;
    Ok(results
        .results
        .bindings
        .into_iter()
        .map(|row| row.into_iter().map(|(k, term)| (k, term.value)).collect())
        .collect())
}
