//! YAML configuration models.
//!
//! Presence of a renderer block enables that renderer. Defaults are applied
//! at parse time through serde default functions, so downstream code never
//! sees absence for defaulted fields.

use indexmap::IndexMap;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: Vec<ServerConfig>,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_io_timeout")]
    pub read_timeout: u64,
    #[serde(default = "default_io_timeout")]
    pub write_timeout: u64,
    pub access_log: Option<PathBuf>,
    pub tls: Option<ServerTlsConfig>,
    pub rewrite: Option<RewriteConfig>,
    pub header: Option<HeaderConfig>,
    #[serde(rename = "static")]
    pub static_files: Option<StaticConfig>,
    pub robots: Option<RobotsConfig>,
    pub sitemap: Option<SitemapConfig>,
    pub index: Option<IndexConfig>,
    pub default: Option<DefaultConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
            read_timeout: default_io_timeout(),
            write_timeout: default_io_timeout(),
            access_log: None,
            tls: None,
            rewrite: None,
            header: None,
            static_files: None,
            robots: None,
            sitemap: None,
            index: None,
            default: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerTlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    /// When set, client certificates are required and verified against this
    /// CA (mutual TLS).
    pub ca_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RewriteConfig {
    #[serde(default)]
    pub rules: Vec<RewriteRuleConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RewriteRuleConfig {
    pub path: String,
    pub replace: String,
    pub flag: Option<RewriteFlag>,
    #[serde(default)]
    pub last: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewriteFlag {
    Redirect,
    Permanent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderConfig {
    #[serde(default)]
    pub rules: Vec<HeaderRuleConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderRuleConfig {
    pub path: String,
    #[serde(default)]
    pub set: IndexMap<String, String>,
    #[serde(default)]
    pub add: IndexMap<String, String>,
    #[serde(default)]
    pub remove: Vec<String>,
    #[serde(default)]
    pub last: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticConfig {
    pub dir: PathBuf,
    /// Serve `index.html` for directory paths.
    #[serde(default)]
    pub index: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RobotsConfig {
    #[serde(default = "default_robots_path")]
    pub path: String,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub sitemaps: Vec<String>,
    #[serde(default)]
    pub cache: bool,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SitemapConfig {
    #[serde(default)]
    pub cache: bool,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
    #[serde(default)]
    pub routes: Vec<SitemapRouteConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SitemapRouteConfig {
    pub path: String,
    pub kind: SitemapKind,
    #[serde(default)]
    pub entries: Vec<SitemapEntryConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SitemapKind {
    SitemapIndex,
    Urlset,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SitemapEntryConfig {
    Static {
        loc: String,
        lastmod: Option<String>,
        changefreq: Option<ChangeFreq>,
        priority: Option<f32>,
    },
    List {
        resource: String,
        #[serde(default = "default_payload_items")]
        payload: String,
        changefreq: Option<ChangeFreq>,
        priority: Option<f32>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeFreq {
    Always,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Never,
}

impl ChangeFreq {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
            Self::Never => "never",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexConfig {
    pub html: PathBuf,
    pub bundle: Option<PathBuf>,
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default = "default_container")]
    pub container: String,
    #[serde(default = "default_state_id")]
    pub state: String,
    /// VM execution deadline in seconds.
    #[serde(default = "default_index_timeout")]
    pub timeout: u64,
    /// Upper bound on pooled VMs; 0 means the CPU count.
    #[serde(default)]
    pub max_vms: usize,
    #[serde(default)]
    pub cache: bool,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
    #[serde(default)]
    pub rules: Vec<IndexRuleConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexRuleConfig {
    pub path: String,
    #[serde(default)]
    pub state: Vec<StateEntryConfig>,
    #[serde(default)]
    pub last: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateEntryConfig {
    pub key: String,
    pub resource: String,
    #[serde(default)]
    pub export: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultConfig {
    pub file: PathBuf,
    #[serde(default = "default_status_code")]
    pub status_code: u16,
    #[serde(default)]
    pub cache: bool,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetcherConfig {
    pub request_tls: Option<ClientTlsConfig>,
    #[serde(default)]
    pub request_headers: IndexMap<String, String>,
    #[serde(default = "default_io_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_request_retry")]
    pub request_retry: u32,
    #[serde(default = "default_request_delay")]
    pub request_delay: u64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    #[serde(default)]
    pub templates: Vec<ResourceConfig>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            request_tls: None,
            request_headers: IndexMap::new(),
            request_timeout: default_io_timeout(),
            request_retry: default_request_retry(),
            request_delay: default_request_delay(),
            cache_ttl: default_cache_ttl(),
            resources: Vec::new(),
            templates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientTlsConfig {
    pub ca_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    pub name: String,
    #[serde(default)]
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub params: IndexMap<String, String>,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Patch,
    Put,
    Delete,
    Head,
    Options,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoaderConfig {
    #[serde(default = "default_exec_startup")]
    pub exec_startup: u64,
    #[serde(default = "default_exec_interval")]
    pub exec_interval: u64,
    #[serde(default = "default_exec_workers")]
    pub exec_workers: usize,
    #[serde(default)]
    pub rules: Vec<LoaderRuleConfig>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            exec_startup: default_exec_startup(),
            exec_interval: default_exec_interval(),
            exec_workers: default_exec_workers(),
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LoaderRuleConfig {
    /// Refresh one registered resource.
    Static { name: String, resource: String },
    /// Fetch a resource, pluck one sub-object from its JSON payload and
    /// materialize a template-derived resource from it.
    Single {
        name: String,
        resource: String,
        #[serde(default = "default_payload_item")]
        payload_item: String,
        item_template: String,
        item_resource: String,
        #[serde(default)]
        item_params: IndexMap<String, String>,
        #[serde(default)]
        item_headers: IndexMap<String, String>,
    },
    /// Same as `single`, once per element of a payload array.
    List {
        name: String,
        resource: String,
        #[serde(default = "default_payload_items")]
        payload_items: String,
        item_template: String,
        item_resource: String,
        #[serde(default)]
        item_params: IndexMap<String, String>,
        #[serde(default)]
        item_headers: IndexMap<String, String>,
    },
}

impl LoaderRuleConfig {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Static { name, .. } | Self::Single { name, .. } | Self::List { name, .. } => name,
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0".to_string()
}

const fn default_listen_port() -> u16 {
    8080
}

const fn default_io_timeout() -> u64 {
    60
}

const fn default_request_retry() -> u32 {
    3
}

const fn default_request_delay() -> u64 {
    1
}

const fn default_cache_ttl() -> u64 {
    60
}

const fn default_exec_startup() -> u64 {
    15
}

const fn default_exec_interval() -> u64 {
    900
}

const fn default_exec_workers() -> usize {
    1
}

const fn default_index_timeout() -> u64 {
    4
}

const fn default_status_code() -> u16 {
    200
}

fn default_robots_path() -> String {
    "/robots.txt".to_string()
}

fn default_env() -> String {
    "production".to_string()
}

fn default_container() -> String {
    "root".to_string()
}

fn default_state_id() -> String {
    "state".to_string()
}

fn default_payload_item() -> String {
    "item".to_string()
}

fn default_payload_items() -> String {
    "items".to_string()
}
