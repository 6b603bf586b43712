//! Scheduled refresh of the fetch cache.
//!
//! Every sweep pushes all configured rules through a bounded worker pool and
//! logs a success/failure summary. `single` and `list` rules materialize
//! template-derived resources from list payloads before fetching them.

use crate::config::{LoaderConfig, LoaderRuleConfig};
use crate::error::Error;
use crate::fetcher::Fetcher;
use crate::substitute::{substitute, Params};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Loader {
    fetcher: Arc<Fetcher>,
    rules: Vec<LoaderRuleConfig>,
    startup: Duration,
    interval: Duration,
    workers: usize,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Loader {
    #[must_use]
    pub fn new(config: &LoaderConfig, fetcher: Arc<Fetcher>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            fetcher,
            rules: config.rules.clone(),
            startup: Duration::from_secs(config.exec_startup),
            interval: Duration::from_secs(config.exec_interval),
            workers: config.exec_workers.max(1),
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Starts the scheduler task: first sweep after the startup delay, then
    /// one per interval.
    pub fn start(self: Arc<Self>) {
        let loader = Arc::clone(&self);
        let mut shutdown = self.shutdown.subscribe();
        let task = tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(loader.startup) => {}
                _ = shutdown.changed() => return,
            }
            loop {
                Arc::clone(&loader).sweep().await;
                tokio::select! {
                    () = tokio::time::sleep(loader.interval) => {}
                    _ = shutdown.changed() => return,
                }
            }
        });
        *self.task.lock().expect("loader task mutex poisoned") = Some(task);
    }

    /// Signals shutdown and waits for the scheduler (and any in-flight sweep)
    /// to wind down.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().expect("loader task mutex poisoned").take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Runs every rule once through the worker pool.
    pub async fn sweep(self: Arc<Self>) {
        let total = self.rules.len();
        if total == 0 {
            return;
        }

        let (job_tx, job_rx) = mpsc::channel::<usize>(total);
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<(usize, Result<(), Error>)>(total);

        for _ in 0..self.workers {
            let loader = Arc::clone(&self);
            let jobs = Arc::clone(&job_rx);
            let results = result_tx.clone();
            let shutdown = self.shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    let index = { jobs.lock().await.recv().await };
                    let Some(index) = index else { break };
                    if *shutdown.borrow() {
                        break;
                    }
                    let result = loader.execute_rule(&loader.rules[index]).await;
                    if results.send((index, result)).await.is_err() {
                        break;
                    }
                }
            });
        }

        for index in 0..total {
            let _ = job_tx.send(index).await;
        }
        drop(job_tx);
        drop(result_tx);

        let mut success = 0usize;
        let mut failure = 0usize;
        while let Some((index, result)) = result_rx.recv().await {
            match result {
                Ok(()) => success += 1,
                Err(e) => {
                    failure += 1;
                    warn!(rule = self.rules[index].name(), error = %e, "loader rule failed");
                }
            }
        }
        info!(success, failure, total, "loader sweep finished");
    }

    async fn execute_rule(&self, rule: &LoaderRuleConfig) -> Result<(), Error> {
        match rule {
            LoaderRuleConfig::Static { resource, .. } => self.fetcher.fetch(resource).await,
            LoaderRuleConfig::Single {
                resource,
                payload_item,
                item_template,
                item_resource,
                item_params,
                item_headers,
                ..
            } => {
                self.fetcher.fetch(resource).await?;
                let payload: serde_json::Value =
                    serde_json::from_slice(&self.fetcher.get(resource)?)?;
                let Some(item) = payload.get(payload_item) else {
                    return Ok(());
                };
                self.materialize(item, item_template, item_resource, item_params, item_headers)
                    .await
            }
            LoaderRuleConfig::List {
                resource,
                payload_items,
                item_template,
                item_resource,
                item_params,
                item_headers,
                ..
            } => {
                self.fetcher.fetch(resource).await?;
                let payload: serde_json::Value =
                    serde_json::from_slice(&self.fetcher.get(resource)?)?;
                let Some(items) = payload.get(payload_items).and_then(|v| v.as_array()) else {
                    return Ok(());
                };
                for item in items {
                    self.materialize(item, item_template, item_resource, item_params, item_headers)
                        .await?;
                }
                Ok(())
            }
        }
    }

    /// Instantiates the template for one payload item, registers the derived
    /// resource when new and fetches it.
    async fn materialize(
        &self,
        item: &serde_json::Value,
        item_template: &str,
        item_resource: &str,
        item_params: &indexmap::IndexMap<String, String>,
        item_headers: &indexmap::IndexMap<String, String>,
    ) -> Result<(), Error> {
        let fields = item_fields(item);
        let name = substitute(item_resource, &fields);

        // The item's own fields drive template substitution; the rule's maps
        // (themselves substituted) rename or augment on top.
        let mut params = fields.clone();
        for (key, value) in item_params {
            params.insert(substitute(key, &fields), substitute(value, &fields));
        }
        let mut headers = fields.clone();
        for (key, value) in item_headers {
            headers.insert(substitute(key, &fields), substitute(value, &fields));
        }

        let derived =
            self.fetcher
                .create_resource_from_template(item_template, &name, &params, &headers)?;
        if !self.fetcher.exists(&name) {
            self.fetcher.register(derived);
        }
        self.fetcher.fetch(&name).await
    }
}

/// String, number and bool fields of a payload item become substitution
/// parameters; numbers use their shortest decimal form, other JSON types are
/// skipped.
fn item_fields(item: &serde_json::Value) -> Params {
    let mut params = Params::new();
    let Some(object) = item.as_object() else {
        return params;
    };
    for (key, value) in object {
        match value {
            serde_json::Value::String(s) => {
                params.insert(key.clone(), s.clone());
            }
            serde_json::Value::Number(n) => {
                params.insert(key.clone(), n.to_string());
            }
            serde_json::Value::Bool(b) => {
                params.insert(key.clone(), b.to_string());
            }
            _ => {}
        }
    }
    params
}
