//! Resource registry and outbound request engine.
//!
//! The fetcher owns one HTTPS client built at startup, a registry of named
//! resources and templates, and a TTL cache of raw response bodies keyed by
//! resource name. The loader refreshes the cache on its schedule; the index
//! renderer reads it synchronously per request.

pub mod resource;

use crate::cache::Cache;
use crate::config::FetcherConfig;
use crate::error::Error;
use crate::substitute::{substitute, Params};
use bytes::Bytes;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, warn};

pub use resource::Resource;

pub struct Fetcher {
    client: reqwest::Client,
    resources: RwLock<HashMap<String, Resource>>,
    templates: RwLock<HashMap<String, Resource>>,
    cache: Cache<Bytes>,
    cache_ttl: Duration,
    request_retry: u32,
    request_delay: Duration,
}

impl Fetcher {
    /// Builds the client and registers configured resources and templates.
    ///
    /// # Errors
    ///
    /// Returns an error when TLS material cannot be read or the client cannot
    /// be constructed.
    pub fn new(config: &FetcherConfig) -> Result<Self, Error> {
        let client = build_client(config)?;

        let fetcher = Self {
            client,
            resources: RwLock::new(HashMap::new()),
            templates: RwLock::new(HashMap::new()),
            cache: Cache::new(),
            cache_ttl: Duration::from_secs(config.cache_ttl),
            request_retry: config.request_retry.max(1),
            request_delay: Duration::from_secs(config.request_delay),
        };

        for resource in &config.resources {
            fetcher.register(Resource::from(resource));
        }
        {
            let mut templates = fetcher.templates.write().expect("template registry poisoned");
            for template in &config.templates {
                templates.insert(template.name.clone(), Resource::from(template));
            }
        }

        Ok(fetcher)
    }

    /// Registers a resource by name, replacing any previous registration.
    pub fn register(&self, resource: Resource) {
        self.resources
            .write()
            .expect("resource registry poisoned")
            .insert(resource.name.clone(), resource);
    }

    /// True when a resource with this name is registered.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.resources
            .read()
            .expect("resource registry poisoned")
            .contains_key(name)
    }

    /// Instantiates a template into a named resource.
    ///
    /// The URL and the param keys and values are `$`-substituted with
    /// `params`; the header keys and values with `headers`. The result is a
    /// pure function of the inputs; the registry is not touched.
    ///
    /// # Errors
    ///
    /// Returns `Error::TemplateUnknown` when no such template is registered.
    pub fn create_resource_from_template(
        &self,
        template_name: &str,
        new_name: &str,
        params: &Params,
        headers: &Params,
    ) -> Result<Resource, Error> {
        let template = self
            .templates
            .read()
            .expect("template registry poisoned")
            .get(template_name)
            .cloned()
            .ok_or_else(|| Error::TemplateUnknown(template_name.to_string()))?;

        let mut derived_params = IndexMap::with_capacity(template.params.len());
        for (key, value) in &template.params {
            derived_params.insert(substitute(key, params), substitute(value, params));
        }
        let mut derived_headers = IndexMap::with_capacity(template.headers.len());
        for (key, value) in &template.headers {
            derived_headers.insert(substitute(key, headers), substitute(value, headers));
        }

        Ok(Resource {
            name: new_name.to_string(),
            method: template.method,
            url: substitute(&template.url, params),
            params: derived_params,
            headers: derived_headers,
        })
    }

    /// Performs the configured request for a registered resource and caches
    /// the raw body on success.
    ///
    /// Up to `request_retry` attempts, separated by `request_delay`; any
    /// non-2xx status or transport error triggers another attempt. On
    /// terminal failure the existing cache entry is left untouched so stale
    /// data keeps serving.
    ///
    /// # Errors
    ///
    /// Returns `Error::ResourceUnknown` for an unregistered name and
    /// `Error::Fetch` after retry exhaustion.
    pub async fn fetch(&self, name: &str) -> Result<(), Error> {
        let resource = self
            .resources
            .read()
            .expect("resource registry poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ResourceUnknown(name.to_string()))?;

        let mut last_failure = String::new();
        for attempt in 1..=self.request_retry {
            match self.attempt(&resource).await {
                Ok(body) => {
                    debug!(resource = name, bytes = body.len(), attempt, "fetched resource");
                    self.cache.set(name, body, self.cache_ttl);
                    return Ok(());
                }
                Err(reason) => {
                    warn!(resource = name, attempt, %reason, "fetch attempt failed");
                    last_failure = reason;
                    if attempt < self.request_retry {
                        tokio::time::sleep(self.request_delay).await;
                    }
                }
            }
        }
        Err(Error::fetch_failed(name, last_failure))
    }

    async fn attempt(&self, resource: &Resource) -> Result<Bytes, String> {
        let mut request = self
            .client
            .request(resource.method.into(), &resource.url);
        if !resource.params.is_empty() {
            let query: Vec<(&str, &str)> = resource
                .params
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            request = request.query(&query);
        }
        for (name, value) in &resource.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("unexpected status {status}"));
        }
        response.bytes().await.map_err(|e| e.to_string())
    }

    /// Returns the cached body for a registered resource.
    ///
    /// # Errors
    ///
    /// `Error::ResourceUnknown` when the name was never registered;
    /// `Error::ResourceNotLoaded` when registered but without a live cache
    /// entry.
    pub fn get(&self, name: &str) -> Result<Bytes, Error> {
        if !self.exists(name) {
            return Err(Error::ResourceUnknown(name.to_string()));
        }
        self.cache
            .get(name)
            .ok_or_else(|| Error::ResourceNotLoaded(name.to_string()))
    }
}

fn build_client(config: &FetcherConfig) -> Result<reqwest::Client, Error> {
    // The process-wide TLS provider must exist before any client or server
    // config is built; installing twice is a no-op.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut default_headers = reqwest::header::HeaderMap::new();
    for (name, value) in &config.request_headers {
        let name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::invalid_config(format!("fetcher.request_headers '{name}': {e}")))?;
        let value = reqwest::header::HeaderValue::from_str(value)
            .map_err(|e| Error::invalid_config(format!("fetcher.request_headers '{name:?}': {e}")))?;
        default_headers.insert(name, value);
    }

    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout))
        .default_headers(default_headers)
        .use_rustls_tls();

    if let Some(tls) = &config.request_tls {
        if let Some(ca_file) = &tls.ca_file {
            let pem = std::fs::read(ca_file)?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }
        if let (Some(cert_file), Some(key_file)) = (&tls.cert_file, &tls.key_file) {
            let mut pem = std::fs::read(cert_file)?;
            pem.extend(std::fs::read(key_file)?);
            builder = builder.identity(reqwest::Identity::from_pem(&pem)?);
        }
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpMethod;

    fn test_fetcher() -> Fetcher {
        Fetcher::new(&FetcherConfig::default()).unwrap()
    }

    fn template(url: &str, params: &[(&str, &str)], headers: &[(&str, &str)]) -> Resource {
        Resource {
            name: "tpl".to_string(),
            method: HttpMethod::Get,
            url: url.to_string(),
            params: params
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            headers: headers
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn register_replaces_on_duplicate_name() {
        let fetcher = test_fetcher();
        let mut resource = template("https://api/a", &[], &[]);
        resource.name = "r".to_string();
        fetcher.register(resource.clone());
        resource.url = "https://api/b".to_string();
        fetcher.register(resource);
        assert!(fetcher.exists("r"));
        assert_eq!(
            fetcher.resources.read().unwrap().get("r").unwrap().url,
            "https://api/b"
        );
    }

    #[test]
    fn get_distinguishes_unknown_from_unloaded() {
        let fetcher = test_fetcher();
        assert!(matches!(fetcher.get("nope"), Err(Error::ResourceUnknown(_))));

        let mut resource = template("https://api/a", &[], &[]);
        resource.name = "known".to_string();
        fetcher.register(resource);
        assert!(matches!(
            fetcher.get("known"),
            Err(Error::ResourceNotLoaded(_))
        ));
    }

    #[test]
    fn template_instantiation_is_pure_and_substitutes_both_maps() {
        let fetcher = test_fetcher();
        fetcher.templates.write().unwrap().insert(
            "tpl".to_string(),
            template(
                "https://api/item/$id",
                &[("q-$id", "v-$id")],
                &[("X-Token", "$token")],
            ),
        );

        let p = params(&[("id", "7")]);
        let h = params(&[("token", "secret")]);
        let first = fetcher
            .create_resource_from_template("tpl", "item-7", &p, &h)
            .unwrap();
        let second = fetcher
            .create_resource_from_template("tpl", "item-7", &p, &h)
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.url, "https://api/item/7");
        assert_eq!(first.params.get("q-7"), Some(&"v-7".to_string()));
        assert_eq!(first.headers.get("X-Token"), Some(&"secret".to_string()));
        // Instantiation does not register anything.
        assert!(!fetcher.exists("item-7"));
    }

    #[test]
    fn template_with_undefined_placeholder_keeps_it_verbatim() {
        let fetcher = test_fetcher();
        fetcher
            .templates
            .write()
            .unwrap()
            .insert("tpl".to_string(), template("https://api/$missing", &[], &[]));

        let derived = fetcher
            .create_resource_from_template("tpl", "d", &Params::new(), &Params::new())
            .unwrap();
        assert_eq!(derived.url, "https://api/$missing");
    }

    #[test]
    fn unknown_template_errors() {
        let fetcher = test_fetcher();
        assert!(matches!(
            fetcher.create_resource_from_template("nope", "d", &Params::new(), &Params::new()),
            Err(Error::TemplateUnknown(_))
        ));
    }
}
