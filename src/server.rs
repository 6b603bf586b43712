//! HTTP server frame: listeners, middleware and chain wiring.
//!
//! Every request goes through one mux entry (the router fallback) which
//! drives the renderer chain. Correlation IDs are assigned by the request-id
//! layer and echoed on the response; panics inside a request are caught and
//! answered with 500.

use crate::config::{Config, ServerConfig, ServerTlsConfig};
use crate::error::Error;
use crate::fetcher::Fetcher;
use crate::loader::Loader;
use crate::logging::AccessLog;
use crate::render::fallback::DefaultRenderer;
use crate::render::header::HeaderRenderer;
use crate::render::index::IndexRenderer;
use crate::render::rewrite::RewriteRenderer;
use crate::render::robots::RobotsRenderer;
use crate::render::sitemap::SitemapRenderer;
use crate::render::static_files::StaticRenderer;
use crate::render::{Chain, HeaderOp, RenderContext, Renderer};
use crate::vm::VmPool;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Shared per-server state behind the router.
pub struct AppState {
    pub chain: Chain,
    pub access_log: Option<Arc<AccessLog>>,
    pub server_header: String,
}

/// Builds the router for one configured server.
///
/// # Errors
///
/// Returns an error when a renderer block fails to compile or the access log
/// cannot be opened.
pub fn build_server(
    config: &ServerConfig,
    fetcher: Arc<Fetcher>,
) -> Result<(Router, Option<Arc<VmPool>>), Error> {
    let mut renderers: Vec<Box<dyn Renderer>> = Vec::new();
    let mut pool = None;

    if let Some(rewrite) = &config.rewrite {
        renderers.push(Box::new(RewriteRenderer::new(rewrite)?));
    }
    if let Some(header) = &config.header {
        renderers.push(Box::new(HeaderRenderer::new(header)?));
    }
    if let Some(static_files) = &config.static_files {
        renderers.push(Box::new(StaticRenderer::new(static_files)));
    }
    if let Some(robots) = &config.robots {
        renderers.push(Box::new(RobotsRenderer::new(robots)));
    }
    if let Some(sitemap) = &config.sitemap {
        renderers.push(Box::new(SitemapRenderer::new(sitemap, Arc::clone(&fetcher))));
    }
    if let Some(index) = &config.index {
        let vm_pool = Arc::new(VmPool::new(index.max_vms));
        renderers.push(Box::new(IndexRenderer::new(
            index,
            config.listen_addr.clone(),
            config.listen_port,
            Arc::clone(&fetcher),
            Arc::clone(&vm_pool),
        )?));
        pool = Some(vm_pool);
    }
    if let Some(default) = &config.default {
        renderers.push(Box::new(DefaultRenderer::new(default)));
    }

    let access_log = config
        .access_log
        .as_deref()
        .map(AccessLog::open)
        .transpose()?
        .map(Arc::new);

    let state = Arc::new(AppState {
        chain: Chain::new(renderers),
        access_log,
        server_header: format!("neon/{}", env!("CARGO_PKG_VERSION")),
    });

    Ok((
        build_router(state, Duration::from_secs(config.write_timeout)),
        pool,
    ))
}

/// Single mux entry plus the middleware stack.
pub fn build_router(state: Arc<AppState>, write_timeout: Duration) -> Router {
    let correlation = HeaderName::from_static(CORRELATION_ID_HEADER);
    Router::new()
        .fallback(handle_request)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(write_timeout))
        .layer(CatchPanicLayer::new())
        .layer(PropagateRequestIdLayer::new(correlation.clone()))
        .layer(SetRequestIdLayer::new(correlation, MakeRequestUuid))
        .with_state(state)
}

async fn handle_request(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string);

    let mut ctx = RenderContext::new(
        method.clone(),
        path.clone(),
        request.headers().clone(),
        correlation_id.clone(),
    );
    let output = state.chain.dispatch(&mut ctx).await;
    let body_len = output.body.len();
    let status = output.status;

    let mut response = Response::new(Body::from(output.body));
    *response.status_mut() =
        StatusCode::from_u16(output.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let headers = response.headers_mut();
    for (name, value) in &output.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }
    apply_header_ops(&ctx.header_ops, headers);
    headers.insert(
        header::SERVER,
        HeaderValue::from_str(&state.server_header)
            .unwrap_or_else(|_| HeaderValue::from_static("neon")),
    );
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        headers.insert(HeaderName::from_static(CORRELATION_ID_HEADER), value);
    }

    if let Some(log) = &state.access_log {
        log.write_line(
            &correlation_id,
            method.as_str(),
            &path,
            status,
            body_len,
            started.elapsed(),
        );
    }
    response
}

/// Applies accumulated header-renderer operations to the final response.
pub fn apply_header_ops(ops: &[HeaderOp], headers: &mut HeaderMap) {
    for op in ops {
        match op {
            HeaderOp::Set(name, value) => {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    headers.insert(name, value);
                }
            }
            HeaderOp::Add(name, value) => {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    headers.append(name, value);
                }
            }
            HeaderOp::Remove(name) => {
                if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
                    headers.remove(name);
                }
            }
        }
    }
}

/// Runs all configured servers until SIGINT, then drains them, stops the
/// loader and shuts the VM pools down.
///
/// # Errors
///
/// Returns an error on configuration, TLS material or bind failure.
pub async fn serve(config: &Config) -> Result<(), Error> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let fetcher = Arc::new(Fetcher::new(&config.fetcher)?);
    let loader = Arc::new(Loader::new(&config.loader, Arc::clone(&fetcher)));
    Arc::clone(&loader).start();

    let mut pools = Vec::new();
    let mut servers = Vec::new();
    for server_config in &config.server {
        let (router, pool) = build_server(server_config, Arc::clone(&fetcher))?;
        pools.extend(pool);

        let addr: SocketAddr = format!(
            "{}:{}",
            server_config.listen_addr, server_config.listen_port
        )
        .parse()
        .map_err(|e| {
            Error::invalid_config(format!(
                "invalid listen address {}:{}: {e}",
                server_config.listen_addr, server_config.listen_port
            ))
        })?;

        let handle = Handle::new();
        let task = match &server_config.tls {
            Some(tls) => {
                let rustls_config = build_rustls_config(tls)?;
                let mut server = axum_server::bind_rustls(addr, rustls_config);
                // read_timeout bounds the window from accept to a complete
                // request head; write_timeout is enforced by the router's
                // timeout layer.
                server
                    .http_builder()
                    .http1()
                    .header_read_timeout(Duration::from_secs(server_config.read_timeout));
                tokio::spawn(
                    server
                        .handle(handle.clone())
                        .serve(router.into_make_service()),
                )
            }
            None => {
                let mut server = axum_server::bind(addr);
                server
                    .http_builder()
                    .http1()
                    .header_read_timeout(Duration::from_secs(server_config.read_timeout));
                tokio::spawn(
                    server
                        .handle(handle.clone())
                        .serve(router.into_make_service()),
                )
            }
        };
        info!(%addr, tls = server_config.tls.is_some(), "server listening");
        servers.push((handle, task));
    }

    // Surface bind failures instead of waiting for a signal that will never
    // matter.
    let mut bind_failure = None;
    for (handle, task) in &mut servers {
        if handle.listening().await.is_none() {
            bind_failure = Some(match (&mut *task).await {
                Ok(Err(e)) => Error::Io(e),
                _ => Error::invalid_config("listener failed to start"),
            });
            break;
        }
    }
    if let Some(error) = bind_failure {
        shutdown(&servers, &loader, &pools).await;
        return Err(error);
    }

    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    shutdown(&servers, &loader, &pools).await;
    Ok(())
}

async fn shutdown(
    servers: &[(Handle<SocketAddr>, tokio::task::JoinHandle<std::io::Result<()>>)],
    loader: &Arc<Loader>,
    pools: &[Arc<VmPool>],
) {
    for (handle, _) in servers {
        handle.graceful_shutdown(Some(Duration::from_secs(30)));
    }
    loader.stop().await;
    for pool in pools {
        pool.shutdown();
    }
}

fn build_rustls_config(tls: &ServerTlsConfig) -> Result<RustlsConfig, Error> {
    let certs = load_certs(&tls.cert_file)?;
    let key = load_key(&tls.key_file)?;

    let builder = rustls::ServerConfig::builder();
    let server_config = match &tls.ca_file {
        Some(ca_file) => {
            let mut roots = rustls::RootCertStore::empty();
            for cert in load_certs(ca_file)? {
                roots
                    .add(cert)
                    .map_err(|e| Error::invalid_config(format!("tls ca_file: {e}")))?;
            }
            let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|e| Error::invalid_config(format!("tls client verifier: {e}")))?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)
        }
        None => builder.with_no_client_auth().with_single_cert(certs, key),
    }
    .map_err(|e| Error::invalid_config(format!("tls material: {e}")))?;

    Ok(RustlsConfig::from_config(Arc::new(server_config)))
}

fn load_certs(
    path: &std::path::Path,
) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, Error> {
    let file = std::fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let certs: Result<Vec<_>, _> = rustls_pemfile::certs(&mut reader).collect();
    Ok(certs?)
}

fn load_key(path: &std::path::Path) -> Result<rustls::pki_types::PrivateKeyDer<'static>, Error> {
    let file = std::fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| Error::invalid_config(format!("no private key in {}", path.display())))
}
