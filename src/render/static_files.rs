//! Static file serving out of a configured directory.

use crate::config::StaticConfig;
use crate::error::Error;
use crate::render::{RenderContext, RenderOutput, Renderer};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};

pub struct StaticRenderer {
    dir: PathBuf,
    index: bool,
}

impl StaticRenderer {
    #[must_use]
    pub fn new(config: &StaticConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            index: config.index,
        }
    }

    /// Maps a request path to a file under `dir`, rejecting traversal.
    fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let relative = request_path.trim_start_matches('/');
        let candidate = Path::new(relative);
        if candidate
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        let mut full = self.dir.join(candidate);
        if full.is_dir() {
            if !self.index {
                return None;
            }
            full = full.join("index.html");
        }
        full.is_file().then_some(full)
    }
}

/// Content type by file extension; unknown extensions are served as opaque
/// bytes.
fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("json" | "map") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("xml") => "application/xml",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("wasm") => "application/wasm",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl Renderer for StaticRenderer {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn handle(&self, ctx: &mut RenderContext) -> Result<Option<RenderOutput>, Error> {
        let Some(full) = self.resolve(&ctx.path) else {
            return Ok(None);
        };
        let body = tokio::fs::read(&full).await?;
        Ok(Some(RenderOutput::new(
            200,
            content_type_for(&full),
            Bytes::from(body),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Method};
    use std::fs;

    fn ctx(path: &str) -> RenderContext {
        RenderContext::new(Method::GET, path.to_string(), HeaderMap::new(), "id".to_string())
    }

    fn fixture(index: bool) -> (StaticRenderer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.css"), "body{}").unwrap();
        fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
        let renderer = StaticRenderer::new(&StaticConfig {
            dir: dir.path().to_path_buf(),
            index,
        });
        (renderer, dir)
    }

    #[tokio::test]
    async fn serves_existing_file_with_content_type() {
        let (renderer, _dir) = fixture(false);
        let out = renderer.handle(&mut ctx("/app.css")).await.unwrap().unwrap();
        assert_eq!(out.status, 200);
        assert!(out
            .headers
            .contains(&("Content-Type".to_string(), "text/css; charset=utf-8".to_string())));
        assert_eq!(out.body, Bytes::from_static(b"body{}"));
    }

    #[tokio::test]
    async fn missing_file_forwards() {
        let (renderer, _dir) = fixture(false);
        assert!(renderer.handle(&mut ctx("/nope.css")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn directory_index_only_when_configured() {
        let (without, _d1) = fixture(false);
        assert!(without.handle(&mut ctx("/")).await.unwrap().is_none());

        let (with, _d2) = fixture(true);
        let out = with.handle(&mut ctx("/")).await.unwrap().unwrap();
        assert_eq!(out.body, Bytes::from_static(b"<html></html>"));
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let (renderer, _dir) = fixture(false);
        assert!(renderer
            .handle(&mut ctx("/../etc/passwd"))
            .await
            .unwrap()
            .is_none());
    }
}
