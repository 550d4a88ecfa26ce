//! JSON-over-HTTP mirror.
//!
//! ## Dialects
//!
//! | Op | `Document` | `Rest` |
//! |----|------------|--------|
//! | Upsert | `PUT {base}/{id}` with the record | `POST {base}` with `[record]`, merge-duplicates |
//! | Remove | `DELETE {base}/{id}` (404 is success) | `DELETE {base}?id=eq.{id}` |
//! | ReplaceAll | `PUT {base}` with the array | `DELETE {base}?id=gte.0`, then bulk `POST` |
//!
//! `Document` suits document stores keyed by id; `Rest` matches PostgREST-style
//! table endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use stockroom_inventory::InventoryRecord;

use super::{Mirror, MirrorError, MirrorOp};
use crate::config::MirrorTarget;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HttpDialect {
    Document,
    Rest,
}

#[derive(Debug, Clone)]
pub struct HttpMirror {
    name: String,
    base_url: String,
    dialect: HttpDialect,
    api_key: Option<String>,
    client: Client,
}

impl HttpMirror {
    /// Fails only if the HTTP client cannot be built (e.g. no TLS backend).
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        dialect: HttpDialect,
    ) -> Result<Self, MirrorError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MirrorError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            dialect,
            api_key: None,
            client,
        })
    }

    pub fn from_target(target: &MirrorTarget) -> Result<Self, MirrorError> {
        let mirror = Self::new(&target.name, &target.url, target.dialect)?;
        Ok(match &target.api_key {
            Some(key) => mirror.with_api_key(key),
            None => mirror,
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("apikey", key).bearer_auth(key),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, MirrorError> {
        self.authorize(req)
            .send()
            .await
            .map_err(|e| MirrorError::Transport(e.to_string()))
    }

    async fn upsert_rows(&self, rows: &[InventoryRecord]) -> Result<(), MirrorError> {
        let req = self
            .client
            .post(&self.base_url)
            .header("Prefer", "resolution=merge-duplicates")
            .json(rows);
        expect_success(self.send(req).await?, false).await
    }

    async fn apply_document(&self, op: &MirrorOp) -> Result<(), MirrorError> {
        let resp = match op {
            MirrorOp::Upsert(rec) => {
                let url = format!("{}/{}", self.base_url, rec.id);
                self.send(self.client.put(url).json(rec)).await?
            }
            MirrorOp::Remove(id) => {
                let url = format!("{}/{}", self.base_url, id);
                let resp = self.send(self.client.delete(url)).await?;
                return expect_success(resp, true).await;
            }
            MirrorOp::ReplaceAll(rows) => {
                self.send(self.client.put(&self.base_url).json(rows)).await?
            }
        };
        expect_success(resp, false).await
    }

    async fn apply_rest(&self, op: &MirrorOp) -> Result<(), MirrorError> {
        match op {
            MirrorOp::Upsert(rec) => self.upsert_rows(std::slice::from_ref(rec)).await,
            MirrorOp::Remove(id) => {
                let url = format!("{}?id=eq.{}", self.base_url, id);
                expect_success(self.send(self.client.delete(url)).await?, false).await
            }
            MirrorOp::ReplaceAll(rows) => {
                let url = format!("{}?id=gte.0", self.base_url);
                expect_success(self.send(self.client.delete(url)).await?, false).await?;
                if rows.is_empty() {
                    return Ok(());
                }
                self.upsert_rows(rows).await
            }
        }
    }
}

async fn expect_success(resp: Response, missing_ok: bool) -> Result<(), MirrorError> {
    let status = resp.status();
    if status.is_success() || (missing_ok && status == StatusCode::NOT_FOUND) {
        return Ok(());
    }
    Err(MirrorError::Status {
        status: status.as_u16(),
        body: resp.text().await.unwrap_or_default(),
    })
}

#[async_trait]
impl Mirror for HttpMirror {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, op: &MirrorOp) -> Result<(), MirrorError> {
        tracing::debug!(mirror = %self.name, op = op.kind(), "applying mirror op");
        match self.dialect {
            HttpDialect::Document => self.apply_document(op).await,
            HttpDialect::Rest => self.apply_rest(op).await,
        }
    }
}
