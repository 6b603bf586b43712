//! Sitemap XML rendering per the sitemaps.org schema.
//!
//! Routes are matched by exact path and emit either a `sitemapindex` or a
//! `urlset`. Entries are static or walked out of a cached resource payload
//! (`payload[items][i][loc|lastmod]`).

use crate::cache::Cache;
use crate::config::{SitemapConfig, SitemapEntryConfig, SitemapKind, SitemapRouteConfig};
use crate::error::Error;
use crate::fetcher::Fetcher;
use crate::render::{RenderContext, RenderOutput, Renderer};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const XMLNS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";

pub struct SitemapRenderer {
    routes: Vec<SitemapRouteConfig>,
    fetcher: Arc<Fetcher>,
    cache: Option<Cache<Bytes>>,
    cache_ttl: Duration,
}

struct SitemapUrl {
    loc: String,
    lastmod: Option<String>,
    changefreq: Option<&'static str>,
    priority: Option<f32>,
}

impl SitemapRenderer {
    #[must_use]
    pub fn new(config: &SitemapConfig, fetcher: Arc<Fetcher>) -> Self {
        Self {
            routes: config.routes.clone(),
            fetcher,
            cache: (config.cache && config.cache_ttl > 0).then(Cache::new),
            cache_ttl: Duration::from_secs(config.cache_ttl),
        }
    }

    fn collect_urls(&self, route: &SitemapRouteConfig) -> Vec<SitemapUrl> {
        let mut urls = Vec::new();
        for entry in &route.entries {
            match entry {
                SitemapEntryConfig::Static {
                    loc,
                    lastmod,
                    changefreq,
                    priority,
                } => urls.push(SitemapUrl {
                    loc: loc.clone(),
                    lastmod: lastmod.clone(),
                    changefreq: changefreq.map(|c| c.as_str()),
                    priority: *priority,
                }),
                SitemapEntryConfig::List {
                    resource,
                    payload,
                    changefreq,
                    priority,
                } => match self.list_urls(resource, payload) {
                    Ok(mut listed) => {
                        for url in &mut listed {
                            url.changefreq = changefreq.map(|c| c.as_str());
                            url.priority = *priority;
                        }
                        urls.extend(listed);
                    }
                    Err(e) => {
                        warn!(resource, error = %e, "sitemap list entry skipped");
                    }
                },
            }
        }
        urls
    }

    fn list_urls(&self, resource: &str, payload_key: &str) -> Result<Vec<SitemapUrl>, Error> {
        let body = self.fetcher.get(resource)?;
        let payload: serde_json::Value = serde_json::from_slice(&body)?;
        let Some(items) = payload.get(payload_key).and_then(|v| v.as_array()) else {
            return Ok(Vec::new());
        };
        Ok(items
            .iter()
            .filter_map(|item| {
                let loc = item.get("loc")?.as_str()?.to_string();
                Some(SitemapUrl {
                    loc,
                    lastmod: item
                        .get("lastmod")
                        .and_then(|v| v.as_str())
                        .map(ToString::to_string),
                    changefreq: None,
                    priority: None,
                })
            })
            .collect())
    }

    fn render_route(&self, route: &SitemapRouteConfig) -> String {
        let urls = self.collect_urls(route);
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        match route.kind {
            SitemapKind::SitemapIndex => {
                let _ = writeln!(xml, "<sitemapindex xmlns=\"{XMLNS}\">");
                for url in &urls {
                    xml.push_str("  <sitemap>\n");
                    let _ = writeln!(xml, "    <loc>{}</loc>", xml_escape(&url.loc));
                    if let Some(lastmod) = &url.lastmod {
                        let _ = writeln!(xml, "    <lastmod>{}</lastmod>", xml_escape(lastmod));
                    }
                    xml.push_str("  </sitemap>\n");
                }
                xml.push_str("</sitemapindex>\n");
            }
            SitemapKind::Urlset => {
                let _ = writeln!(xml, "<urlset xmlns=\"{XMLNS}\">");
                for url in &urls {
                    xml.push_str("  <url>\n");
                    let _ = writeln!(xml, "    <loc>{}</loc>", xml_escape(&url.loc));
                    if let Some(lastmod) = &url.lastmod {
                        let _ = writeln!(xml, "    <lastmod>{}</lastmod>", xml_escape(lastmod));
                    }
                    if let Some(changefreq) = url.changefreq {
                        let _ = writeln!(xml, "    <changefreq>{changefreq}</changefreq>");
                    }
                    if let Some(priority) = url.priority {
                        let _ = writeln!(xml, "    <priority>{priority}</priority>");
                    }
                    xml.push_str("  </url>\n");
                }
                xml.push_str("</urlset>\n");
            }
        }
        xml
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[async_trait]
impl Renderer for SitemapRenderer {
    fn name(&self) -> &'static str {
        "sitemap"
    }

    async fn handle(&self, ctx: &mut RenderContext) -> Result<Option<RenderOutput>, Error> {
        let Some(route) = self.routes.iter().find(|r| r.path == ctx.path) else {
            return Ok(None);
        };

        if let Some(cache) = &self.cache {
            if let Some(body) = cache.get(&ctx.path) {
                return Ok(Some(RenderOutput::new(200, "application/xml", body)));
            }
        }

        let body = Bytes::from(self.render_route(route));
        if let Some(cache) = &self.cache {
            cache.set(&ctx.path, body.clone(), self.cache_ttl);
        }
        Ok(Some(RenderOutput::new(200, "application/xml", body)))
    }
}
