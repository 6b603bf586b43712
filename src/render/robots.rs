//! robots.txt rendering with hosts and sitemap listings.

use crate::cache::Cache;
use crate::config::RobotsConfig;
use crate::error::Error;
use crate::render::{RenderContext, RenderOutput, Renderer};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Write;
use std::time::Duration;

pub struct RobotsRenderer {
    path: String,
    hosts: Vec<String>,
    sitemaps: Vec<String>,
    cache: Option<Cache<Bytes>>,
    cache_ttl: Duration,
}

impl RobotsRenderer {
    #[must_use]
    pub fn new(config: &RobotsConfig) -> Self {
        let cache_ttl = Duration::from_secs(config.cache_ttl);
        Self {
            path: config.path.clone(),
            hosts: config.hosts.clone(),
            sitemaps: config.sitemaps.clone(),
            cache: (config.cache && config.cache_ttl > 0).then(Cache::new),
            cache_ttl,
        }
    }

    fn body(&self) -> String {
        let mut body = String::from("User-agent: *\nAllow: /\n");
        for host in &self.hosts {
            let _ = writeln!(body, "Host: {host}");
        }
        for sitemap in &self.sitemaps {
            let _ = writeln!(body, "Sitemap: {sitemap}");
        }
        body
    }
}

#[async_trait]
impl Renderer for RobotsRenderer {
    fn name(&self) -> &'static str {
        "robots"
    }

    async fn handle(&self, ctx: &mut RenderContext) -> Result<Option<RenderOutput>, Error> {
        if ctx.path != self.path {
            return Ok(None);
        }

        if let Some(cache) = &self.cache {
            if let Some(body) = cache.get(&self.path) {
                return Ok(Some(RenderOutput::new(200, "text/plain; charset=utf-8", body)));
            }
        }

        let body = Bytes::from(self.body());
        if let Some(cache) = &self.cache {
            cache.set(&self.path, body.clone(), self.cache_ttl);
        }
        Ok(Some(RenderOutput::new(200, "text/plain; charset=utf-8", body)))
    }
}
