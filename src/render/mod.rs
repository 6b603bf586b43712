//! The renderer chain.
//!
//! A request walks a flat ordered sequence of renderers; each one either
//! terminates the chain with a finished response or forwards to the next.
//! Renderers within a request run sequentially on its task.

pub mod fallback;
pub mod header;
pub mod index;
pub mod rewrite;
pub mod robots;
pub mod sitemap;
pub mod static_files;

use crate::error::Error;
use async_trait::async_trait;
use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use tracing::{debug, error};

/// Mutable per-request state threaded through the chain.
pub struct RenderContext {
    pub method: Method,
    /// Request path; the rewrite renderer may mutate it for later renderers.
    pub path: String,
    pub request_headers: HeaderMap,
    pub correlation_id: String,
    /// Response-header operations accumulated by the header renderer and
    /// applied by the server frame after the chain terminates.
    pub header_ops: Vec<HeaderOp>,
}

impl RenderContext {
    #[must_use]
    pub fn new(method: Method, path: String, request_headers: HeaderMap, correlation_id: String) -> Self {
        Self {
            method,
            path,
            request_headers,
            correlation_id,
            header_ops: Vec::new(),
        }
    }
}

/// A response-header mutation recorded while walking the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderOp {
    Set(String, String),
    Add(String, String),
    Remove(String),
}

/// A finished response produced by a terminating renderer.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl RenderOutput {
    #[must_use]
    pub fn new(status: u16, content_type: &str, body: Bytes) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body,
        }
    }

    #[must_use]
    pub fn redirect(status: u16, location: &str) -> Self {
        Self {
            status,
            headers: vec![("Location".to_string(), location.to_string())],
            body: Bytes::new(),
        }
    }

    #[must_use]
    pub fn not_found() -> Self {
        Self::new(404, "text/plain; charset=utf-8", Bytes::from_static(b"not found"))
    }
}

/// One link of the chain: terminate with `Some(output)` or forward with
/// `None`.
#[async_trait]
pub trait Renderer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, ctx: &mut RenderContext) -> Result<Option<RenderOutput>, Error>;
}

/// Ordered renderer sequence walked head to tail.
pub struct Chain {
    renderers: Vec<Box<dyn Renderer>>,
}

impl Chain {
    #[must_use]
    pub fn new(renderers: Vec<Box<dyn Renderer>>) -> Self {
        Self { renderers }
    }

    /// Walks the chain and always produces a response; renderer errors are
    /// logged at this boundary and mapped to their status class.
    pub async fn dispatch(&self, ctx: &mut RenderContext) -> RenderOutput {
        for renderer in &self.renderers {
            match renderer.handle(ctx).await {
                Ok(Some(output)) => {
                    debug!(
                        renderer = renderer.name(),
                        id = %ctx.correlation_id,
                        status = output.status,
                        "chain terminated"
                    );
                    return output;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(
                        renderer = renderer.name(),
                        id = %ctx.correlation_id,
                        error = %e,
                        "renderer failed"
                    );
                    return error_output(&e);
                }
            }
        }
        RenderOutput::not_found()
    }
}

fn error_output(error: &Error) -> RenderOutput {
    let status = if error.marks_render_invalid() { 503 } else { 500 };
    RenderOutput::new(
        status,
        "text/plain; charset=utf-8",
        Bytes::from_static(b"internal error"),
    )
}
