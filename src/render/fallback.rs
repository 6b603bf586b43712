//! Tail-of-chain fallback: serves a configured file with a configured status.

use crate::cache::Cache;
use crate::config::DefaultConfig;
use crate::error::Error;
use crate::render::{RenderContext, RenderOutput, Renderer};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::time::Duration;

pub struct DefaultRenderer {
    file: PathBuf,
    status_code: u16,
    cache: Option<Cache<Bytes>>,
    cache_ttl: Duration,
}

impl DefaultRenderer {
    #[must_use]
    pub fn new(config: &DefaultConfig) -> Self {
        Self {
            file: config.file.clone(),
            status_code: config.status_code,
            cache: (config.cache && config.cache_ttl > 0).then(Cache::new),
            cache_ttl: Duration::from_secs(config.cache_ttl),
        }
    }
}

#[async_trait]
impl Renderer for DefaultRenderer {
    fn name(&self) -> &'static str {
        "default"
    }

    async fn handle(&self, _ctx: &mut RenderContext) -> Result<Option<RenderOutput>, Error> {
        if let Some(cache) = &self.cache {
            if let Some(body) = cache.get("default") {
                return Ok(Some(RenderOutput::new(
                    self.status_code,
                    "text/html; charset=utf-8",
                    body,
                )));
            }
        }

        let body = tokio::fs::read(&self.file).await.map_err(|e| {
            Error::RenderTemplate(format!("{}: {e}", self.file.display()))
        })?;
        let body = Bytes::from(body);
        if let Some(cache) = &self.cache {
            cache.set("default", body.clone(), self.cache_ttl);
        }
        Ok(Some(RenderOutput::new(
            self.status_code,
            "text/html; charset=utf-8",
            body,
        )))
    }
}
