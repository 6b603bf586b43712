//! Shared helpers for the integration suites.

#![allow(dead_code)]

use indexmap::IndexMap;
use neon::config::{FetcherConfig, HttpMethod, IndexConfig, IndexRuleConfig, ResourceConfig};
use neon::fetcher::Fetcher;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEMPLATE_HTML: &str =
    "<html><head></head><body><div id=\"root\"></div></body></html>";

pub fn write_html(dir: &Path) -> PathBuf {
    let file = dir.join("index.html");
    std::fs::write(&file, TEMPLATE_HTML).unwrap();
    file
}

pub fn write_bundle(dir: &Path, source: &str) -> PathBuf {
    let file = dir.join("main.js");
    std::fs::write(&file, source).unwrap();
    file
}

pub fn resource_config(name: &str, url: String) -> ResourceConfig {
    ResourceConfig {
        name: name.to_string(),
        method: HttpMethod::Get,
        url,
        params: IndexMap::new(),
        headers: IndexMap::new(),
    }
}

/// A fetcher whose named resources are mocked and already fetched into the
/// cache.
pub async fn seeded_fetcher(entries: &[(&str, &str)]) -> (Arc<Fetcher>, MockServer) {
    let server = MockServer::start().await;
    let mut resources = Vec::new();
    for (name, body) in entries {
        Mock::given(method("GET"))
            .and(path(format!("/res/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(*body))
            .mount(&server)
            .await;
        resources.push(resource_config(name, format!("{}/res/{name}", server.uri())));
    }

    let config = FetcherConfig {
        resources,
        request_delay: 0,
        ..FetcherConfig::default()
    };
    let fetcher = Arc::new(Fetcher::new(&config).unwrap());
    for (name, _) in entries {
        fetcher.fetch(name).await.unwrap();
    }
    (fetcher, server)
}

pub fn index_config(html: PathBuf, bundle: Option<PathBuf>, rules: Vec<IndexRuleConfig>) -> IndexConfig {
    IndexConfig {
        html,
        bundle,
        env: "test".to_string(),
        container: "root".to_string(),
        state: "state".to_string(),
        timeout: 4,
        max_vms: 2,
        cache: false,
        cache_ttl: 60,
        rules,
    }
}
