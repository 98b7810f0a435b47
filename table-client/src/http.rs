//! HTTP client for the REST row store
//!
//! Talks to a PostgREST-style endpoint:
//! `GET  {base}/rest/v1/{resource}?select=...&id=eq.12`
//! `PATCH {base}/rest/v1/{resource}?id=eq.12` with `Prefer: return=representation`.
//! Both return a JSON array of rows.

use crate::{ClientConfig, ClientError, ClientResult};
use crate::store::TableSource;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use shared::models::{TABLE_COLUMNS, TableAttentionUpdate};
use shared::{TableId, TableKey, TableRecord};

/// HTTP client for reading and updating dining tables
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    resource: String,
    api_key: Option<String>,
}

impl HttpClient {
    /// Create a new HTTP client from configuration
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            resource: config.resource.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// Set the API key
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn table_url(&self, filter: &str) -> String {
        format!(
            "{}/rest/v1/{}?select={}&{}",
            self.base_url.trim_end_matches('/'),
            self.resource,
            TABLE_COLUMNS,
            filter
        )
    }

    /// Attach the anonymous-access headers
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request
                .header("apikey", key)
                .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", key)),
            None => request,
        }
    }

    /// Fetch the rows matching a filter
    pub async fn select<T: DeserializeOwned>(&self, filter: &str) -> ClientResult<Vec<T>> {
        let request = self
            .authorize(self.client.get(self.table_url(filter)))
            .header(reqwest::header::ACCEPT, "application/json");

        let response = request.send().await.map_err(transient)?;
        Self::handle_response(response).await
    }

    /// Patch the rows matching a filter, returning their new representation
    pub async fn update<T: DeserializeOwned, B: serde::Serialize>(
        &self,
        filter: &str,
        body: &B,
    ) -> ClientResult<Vec<T>> {
        let request = self
            .authorize(self.client.patch(self.table_url(filter)))
            .header("Prefer", "return=representation")
            .json(body);

        let response = request.send().await.map_err(transient)?;
        Self::handle_response(response).await
    }

    /// Handle the HTTP response
    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> ClientResult<T> {
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return match status {
                StatusCode::NOT_FOUND => Err(ClientError::NotFound(text)),
                StatusCode::BAD_REQUEST => Err(ClientError::InvalidResponse(text)),
                _ => Err(ClientError::Transient(format!("{}: {}", status, text))),
            };
        }

        let body = response.bytes().await.map_err(transient)?;
        serde_json::from_slice(&body).map_err(Into::into)
    }
}

fn transient(e: reqwest::Error) -> ClientError {
    ClientError::Transient(e.to_string())
}

#[async_trait]
impl TableSource for HttpClient {
    async fn read_table(&self, key: &TableKey) -> ClientResult<Option<TableRecord>> {
        let rows: Vec<TableRecord> = self.select(&key.filter()).await?;
        if rows.len() > 1 {
            tracing::warn!(%key, "{} rows match, using the first", rows.len());
        }
        Ok(rows.into_iter().next())
    }

    async fn write_attention(
        &self,
        id: TableId,
        needs_attention: bool,
    ) -> ClientResult<Option<TableRecord>> {
        let body = TableAttentionUpdate { needs_attention };
        let rows: Vec<TableRecord> = self
            .update(&TableKey::Id(id).filter(), &body)
            .await
            .map_err(|e| ClientError::WriteFailure(e.to_string()))?;

        match rows.into_iter().next() {
            Some(row) => Ok(Some(row)),
            // PostgREST answers an update that matched nothing with []
            None => Err(ClientError::WriteFailure(format!(
                "no row updated for table #{}",
                id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_url() {
        let config = ClientConfig::new("https://db.example.com/").with_resource("dining_tables");
        let client = HttpClient::new(&config).unwrap();
        assert_eq!(
            client.table_url(&TableKey::Id(12).filter()),
            "https://db.example.com/rest/v1/dining_tables?select=id,code,name,description,needs_attention&id=eq.12"
        );
        assert!(
            client
                .table_url(&TableKey::Code("A1".into()).filter())
                .ends_with("&code=eq.A1")
        );
    }
}
