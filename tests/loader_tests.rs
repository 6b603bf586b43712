mod common;

use common::resource_config;
use indexmap::IndexMap;
use neon::config::{FetcherConfig, HttpMethod, LoaderConfig, LoaderRuleConfig, ResourceConfig};
use neon::fetcher::Fetcher;
use neon::loader::Loader;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn template_config(name: &str, url: String) -> ResourceConfig {
    ResourceConfig {
        name: name.to_string(),
        method: HttpMethod::Get,
        url,
        params: IndexMap::new(),
        headers: IndexMap::new(),
    }
}

async fn mock_body(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn static_rule_refreshes_resource() {
    let server = MockServer::start().await;
    mock_body(&server, "/res/posts", r#"{"posts":[]}"#).await;

    let fetcher = Arc::new(
        Fetcher::new(&FetcherConfig {
            resources: vec![resource_config("posts", format!("{}/res/posts", server.uri()))],
            request_delay: 0,
            ..FetcherConfig::default()
        })
        .unwrap(),
    );

    let loader = Arc::new(Loader::new(
        &LoaderConfig {
            exec_startup: 0,
            exec_interval: 900,
            exec_workers: 1,
            rules: vec![LoaderRuleConfig::Static {
                name: "refresh-posts".to_string(),
                resource: "posts".to_string(),
            }],
        },
        Arc::clone(&fetcher),
    ));

    Arc::clone(&loader).sweep().await;
    assert_eq!(&fetcher.get("posts").unwrap()[..], br#"{"posts":[]}"#);
}

#[tokio::test]
async fn list_rule_materializes_template_per_element() {
    let server = MockServer::start().await;
    mock_body(&server, "/list", r#"{"items":[{"id":"1"},{"id":"2"}]}"#).await;
    mock_body(&server, "/item/1", "one").await;
    mock_body(&server, "/item/2", "two").await;

    let fetcher = Arc::new(
        Fetcher::new(&FetcherConfig {
            resources: vec![resource_config("catalog", format!("{}/list", server.uri()))],
            templates: vec![template_config("item-template", format!("{}/item/$id", server.uri()))],
            request_delay: 0,
            ..FetcherConfig::default()
        })
        .unwrap(),
    );

    let loader = Arc::new(Loader::new(
        &LoaderConfig {
            exec_startup: 0,
            exec_interval: 900,
            exec_workers: 2,
            rules: vec![LoaderRuleConfig::List {
                name: "expand-catalog".to_string(),
                resource: "catalog".to_string(),
                payload_items: "items".to_string(),
                item_template: "item-template".to_string(),
                item_resource: "derived-$id".to_string(),
                item_params: IndexMap::new(),
                item_headers: IndexMap::new(),
            }],
        },
        Arc::clone(&fetcher),
    ));

    Arc::clone(&loader).sweep().await;

    assert!(fetcher.exists("derived-1"));
    assert!(fetcher.exists("derived-2"));
    assert_eq!(&fetcher.get("derived-1").unwrap()[..], b"one");
    assert_eq!(&fetcher.get("derived-2").unwrap()[..], b"two");
}

#[tokio::test]
async fn consecutive_sweeps_are_idempotent() {
    let server = MockServer::start().await;
    mock_body(&server, "/list", r#"{"items":[{"id":"1"}]}"#).await;
    mock_body(&server, "/item/1", "one").await;

    let fetcher = Arc::new(
        Fetcher::new(&FetcherConfig {
            resources: vec![resource_config("catalog", format!("{}/list", server.uri()))],
            templates: vec![template_config("item-template", format!("{}/item/$id", server.uri()))],
            request_delay: 0,
            ..FetcherConfig::default()
        })
        .unwrap(),
    );

    let loader = Arc::new(Loader::new(
        &LoaderConfig {
            exec_startup: 0,
            exec_interval: 900,
            exec_workers: 1,
            rules: vec![LoaderRuleConfig::List {
                name: "expand".to_string(),
                resource: "catalog".to_string(),
                payload_items: "items".to_string(),
                item_template: "item-template".to_string(),
                item_resource: "derived-$id".to_string(),
                item_params: IndexMap::new(),
                item_headers: IndexMap::new(),
            }],
        },
        Arc::clone(&fetcher),
    ));

    Arc::clone(&loader).sweep().await;
    let first = fetcher.get("derived-1").unwrap();
    Arc::clone(&loader).sweep().await;
    let second = fetcher.get("derived-1").unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn single_rule_plucks_sub_object() {
    let server = MockServer::start().await;
    mock_body(&server, "/detail", r#"{"item":{"id":"9","kind":"post"}}"#).await;
    mock_body(&server, "/item/9", "nine").await;

    let fetcher = Arc::new(
        Fetcher::new(&FetcherConfig {
            resources: vec![resource_config("detail", format!("{}/detail", server.uri()))],
            templates: vec![template_config("item-template", format!("{}/item/$id", server.uri()))],
            request_delay: 0,
            ..FetcherConfig::default()
        })
        .unwrap(),
    );

    let loader = Arc::new(Loader::new(
        &LoaderConfig {
            exec_startup: 0,
            exec_interval: 900,
            exec_workers: 1,
            rules: vec![LoaderRuleConfig::Single {
                name: "pluck-detail".to_string(),
                resource: "detail".to_string(),
                payload_item: "item".to_string(),
                item_template: "item-template".to_string(),
                item_resource: "$kind-$id".to_string(),
                item_params: IndexMap::new(),
                item_headers: IndexMap::new(),
            }],
        },
        Arc::clone(&fetcher),
    ));

    Arc::clone(&loader).sweep().await;
    assert!(fetcher.exists("post-9"));
    assert_eq!(&fetcher.get("post-9").unwrap()[..], b"nine");
}

#[tokio::test]
async fn failing_rule_does_not_block_the_rest_of_the_sweep() {
    let server = MockServer::start().await;
    mock_body(&server, "/res/good", "good").await;
    Mock::given(method("GET"))
        .and(path("/res/bad"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let fetcher = Arc::new(
        Fetcher::new(&FetcherConfig {
            resources: vec![
                resource_config("bad", format!("{}/res/bad", server.uri())),
                resource_config("good", format!("{}/res/good", server.uri())),
            ],
            request_delay: 0,
            ..FetcherConfig::default()
        })
        .unwrap(),
    );

    let loader = Arc::new(Loader::new(
        &LoaderConfig {
            exec_startup: 0,
            exec_interval: 900,
            exec_workers: 1,
            rules: vec![
                LoaderRuleConfig::Static {
                    name: "bad".to_string(),
                    resource: "bad".to_string(),
                },
                LoaderRuleConfig::Static {
                    name: "good".to_string(),
                    resource: "good".to_string(),
                },
            ],
        },
        Arc::clone(&fetcher),
    ));

    Arc::clone(&loader).sweep().await;
    assert_eq!(&fetcher.get("good").unwrap()[..], b"good");
}

#[tokio::test]
async fn start_and_stop_wind_down_cleanly() {
    let server = MockServer::start().await;
    mock_body(&server, "/res/posts", "[]").await;

    let fetcher = Arc::new(
        Fetcher::new(&FetcherConfig {
            resources: vec![resource_config("posts", format!("{}/res/posts", server.uri()))],
            request_delay: 0,
            ..FetcherConfig::default()
        })
        .unwrap(),
    );

    let loader = Arc::new(Loader::new(
        &LoaderConfig {
            exec_startup: 0,
            exec_interval: 1,
            exec_workers: 1,
            rules: vec![LoaderRuleConfig::Static {
                name: "refresh".to_string(),
                resource: "posts".to_string(),
            }],
        },
        Arc::clone(&fetcher),
    ));

    Arc::clone(&loader).start();
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    loader.stop().await;
    assert!(fetcher.get("posts").is_ok());
}
