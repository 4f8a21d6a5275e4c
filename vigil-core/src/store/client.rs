//! HTTP client for the remote datastore
//!
//! The datastore exposes a PostgREST-style REST interface: one route per
//! table under `/rest/v1/`, filters as query parameters, and upserts driven
//! by an `on_conflict` parameter plus a `Prefer: resolution=...` header.
//! The `KEY` secret is sent both as `apikey` and as a bearer token.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::DatastoreConfig;
use crate::error::{Error, Result};

/// Retries on transient failures for idempotent writes.
pub const MAX_RETRIES: usize = 3;

/// Conflict resolution for upserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    /// Insert-or-skip: existing rows win.
    IgnoreDuplicates,
    /// Upsert: incoming rows win.
    MergeDuplicates,
}

impl OnConflict {
    fn prefer(&self) -> &'static str {
        match self {
            OnConflict::IgnoreDuplicates => "resolution=ignore-duplicates,return=minimal",
            OnConflict::MergeDuplicates => "resolution=merge-duplicates,return=minimal",
        }
    }
}

/// Remote datastore client.
pub struct Datastore {
    http: reqwest::Client,
    base_url: String,
}

impl Datastore {
    /// Build a client from configuration. The timeout applies to every
    /// request, so no datastore call can block a loop iteration forever.
    pub fn new(config: &DatastoreConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "apikey",
            HeaderValue::from_str(&config.key)
                .map_err(|e| Error::Config(format!("invalid KEY: {e}")))?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.key))
                .map_err(|e| Error::Config(format!("invalid KEY: {e}")))?,
        );

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// SELECT rows matching the given query parameters.
    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let response = self
            .http
            .get(self.table_url(table))
            .query(query)
            .send()
            .await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }

    /// INSERT rows (plain, no conflict handling).
    pub async fn insert<T: Serialize + ?Sized>(&self, table: &str, rows: &T) -> Result<()> {
        let response = self
            .http
            .post(self.table_url(table))
            .header("Prefer", "return=minimal")
            .json(rows)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    /// Upsert rows against the table's conflict target.
    pub async fn upsert<T: Serialize + ?Sized>(
        &self,
        table: &str,
        on_conflict: &str,
        resolution: OnConflict,
        rows: &T,
    ) -> Result<()> {
        let response = self
            .http
            .post(self.table_url(table))
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", resolution.prefer())
            .json(rows)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    /// UPDATE the columns in `body` on every row matching `query`.
    pub async fn update<T: Serialize + ?Sized>(
        &self,
        table: &str,
        query: &[(&str, String)],
        body: &T,
    ) -> Result<()> {
        let response = self
            .http
            .patch(self.table_url(table))
            .query(query)
            .header("Prefer", "return=minimal")
            .json(body)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    /// DELETE every row matching `query`.
    pub async fn delete(&self, table: &str, query: &[(&str, String)]) -> Result<()> {
        let response = self
            .http
            .delete(self.table_url(table))
            .query(query)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_else(|_| "unknown".to_string());
    Err(Error::Datastore {
        status: status.as_u16(),
        body,
    })
}

/// Render a PostgREST `in.(...)` filter value.
pub fn in_list<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = values
        .into_iter()
        .map(|v| format!("\"{}\"", v.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    format!("in.({joined})")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> DatastoreConfig {
        DatastoreConfig {
            url: "https://db.example.com/".to_string(),
            key: "secret-key".to_string(),
            site_url: "https://vigil.sh".to_string(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn client_builds_and_trims_trailing_slash() {
        let store = Datastore::new(&test_config()).unwrap();
        assert_eq!(store.table_url("events"), "https://db.example.com/rest/v1/events");
    }

    #[test]
    fn invalid_key_rejected() {
        let mut config = test_config();
        config.key = "bad\nkey".to_string();
        assert!(Datastore::new(&config).is_err());
    }

    #[test]
    fn in_list_quotes_values() {
        assert_eq!(in_list(["a", "b-c"]), r#"in.("a","b-c")"#);
    }

    #[test]
    fn prefer_headers_for_resolutions() {
        assert!(OnConflict::IgnoreDuplicates.prefer().contains("ignore-duplicates"));
        assert!(OnConflict::MergeDuplicates.prefer().contains("merge-duplicates"));
    }
}
