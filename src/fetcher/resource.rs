//! Resource records: named outbound HTTP request recipes.

use crate::config::{HttpMethod, ResourceConfig};
use indexmap::IndexMap;

/// An outbound request recipe. Immutable once registered; the fetcher caches
/// the response body under `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub method: HttpMethod,
    pub url: String,
    pub params: IndexMap<String, String>,
    pub headers: IndexMap<String, String>,
}

impl From<&ResourceConfig> for Resource {
    fn from(config: &ResourceConfig) -> Self {
        Self {
            name: config.name.clone(),
            method: config.method,
            url: config.url.clone(),
            params: config.params.clone(),
            headers: config.headers.clone(),
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Self::GET,
            HttpMethod::Post => Self::POST,
            HttpMethod::Patch => Self::PATCH,
            HttpMethod::Put => Self::PUT,
            HttpMethod::Delete => Self::DELETE,
            HttpMethod::Head => Self::HEAD,
            HttpMethod::Options => Self::OPTIONS,
        }
    }
}
