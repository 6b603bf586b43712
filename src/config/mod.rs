//! Configuration loading and validation.
//!
//! The YAML file location comes from the CLI (`-c`) or the `CONFIG_FILE`
//! environment variable; `LISTEN_ADDR` and `LISTEN_PORT` override the first
//! server's bind when set.

pub mod models;

use crate::error::Error;
use regex::Regex;
use std::path::{Path, PathBuf};

pub use models::{
    ChangeFreq, Config, DefaultConfig, FetcherConfig, HeaderConfig, HeaderRuleConfig, HttpMethod,
    IndexConfig, IndexRuleConfig, LoaderConfig, LoaderRuleConfig, ResourceConfig, RewriteConfig,
    RewriteFlag, RewriteRuleConfig, RobotsConfig, ServerConfig, ServerTlsConfig, SitemapConfig,
    SitemapEntryConfig, SitemapKind, SitemapRouteConfig, StateEntryConfig, StaticConfig,
};

/// Environment variable naming the configuration file.
pub const ENV_CONFIG_FILE: &str = "CONFIG_FILE";
/// Environment variable overriding the first server's listen address.
pub const ENV_LISTEN_ADDR: &str = "LISTEN_ADDR";
/// Environment variable overriding the first server's listen port.
pub const ENV_LISTEN_PORT: &str = "LISTEN_PORT";

/// Default configuration file name, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "neon.yaml";

/// Resolves the configuration file path: CLI flag first, then `CONFIG_FILE`,
/// then the default name.
#[must_use]
pub fn resolve_config_path(cli_path: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_path {
        return path.to_path_buf();
    }
    std::env::var(ENV_CONFIG_FILE)
        .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from)
}

/// Loads and parses the configuration, applying environment overrides.
///
/// # Errors
///
/// Returns `Error::Io` when the file cannot be read and `Error::Yaml` when it
/// does not parse.
pub fn load(path: &Path) -> Result<Config, Error> {
    let raw = std::fs::read_to_string(path)?;
    let mut config: Config = serde_yaml::from_str(&raw)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    let Some(first) = config.server.first_mut() else {
        return;
    };
    if let Ok(addr) = std::env::var(ENV_LISTEN_ADDR) {
        if !addr.is_empty() {
            first.listen_addr = addr;
        }
    }
    if let Ok(port) = std::env::var(ENV_LISTEN_PORT) {
        if let Ok(port) = port.parse::<u16>() {
            first.listen_port = port;
        }
    }
}

/// Validates the configuration, collecting every finding rather than stopping
/// at the first.
///
/// # Errors
///
/// Returns `Error::Config` carrying the full report when any check fails.
pub fn validate(config: &Config) -> Result<(), Error> {
    let report = validation_report(config);
    if report.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(report.join("; ")))
    }
}

/// Runs every validation check and returns the findings.
#[must_use]
pub fn validation_report(config: &Config) -> Vec<String> {
    let mut findings = Vec::new();

    if config.server.is_empty() {
        findings.push("at least one server must be configured".to_string());
    }

    for (i, server) in config.server.iter().enumerate() {
        validate_server(i, server, &mut findings);
    }

    validate_fetcher(&config.fetcher, &mut findings);
    validate_loader(config, &mut findings);

    findings
}

fn validate_server(i: usize, server: &ServerConfig, findings: &mut Vec<String>) {
    let ctx = format!("server[{i}]");

    if let Some(tls) = &server.tls {
        check_file(&tls.cert_file, &format!("{ctx}.tls.cert_file"), findings);
        check_file(&tls.key_file, &format!("{ctx}.tls.key_file"), findings);
        if let Some(ca) = &tls.ca_file {
            check_file(ca, &format!("{ctx}.tls.ca_file"), findings);
        }
    }

    if let Some(rewrite) = &server.rewrite {
        for (j, rule) in rewrite.rules.iter().enumerate() {
            check_regex(&rule.path, &format!("{ctx}.rewrite.rules[{j}].path"), findings);
        }
    }

    if let Some(header) = &server.header {
        for (j, rule) in header.rules.iter().enumerate() {
            check_regex(&rule.path, &format!("{ctx}.header.rules[{j}].path"), findings);
        }
    }

    if let Some(static_files) = &server.static_files {
        if !static_files.dir.is_dir() {
            findings.push(format!(
                "{ctx}.static.dir: not a directory: {}",
                static_files.dir.display()
            ));
        }
    }

    if let Some(sitemap) = &server.sitemap {
        for (j, route) in sitemap.routes.iter().enumerate() {
            for (k, entry) in route.entries.iter().enumerate() {
                let priority = match entry {
                    SitemapEntryConfig::Static { priority, .. }
                    | SitemapEntryConfig::List { priority, .. } => *priority,
                };
                if let Some(p) = priority {
                    if !(0.0..=1.0).contains(&p) {
                        findings.push(format!(
                            "{ctx}.sitemap.routes[{j}].entries[{k}].priority: {p} outside [0.0, 1.0]"
                        ));
                    }
                }
            }
        }
    }

    if let Some(index) = &server.index {
        check_file(&index.html, &format!("{ctx}.index.html"), findings);
        if let Some(bundle) = &index.bundle {
            check_file(bundle, &format!("{ctx}.index.bundle"), findings);
        }
        for (j, rule) in index.rules.iter().enumerate() {
            check_regex(&rule.path, &format!("{ctx}.index.rules[{j}].path"), findings);
            for (k, entry) in rule.state.iter().enumerate() {
                if entry.key.is_empty() || entry.resource.is_empty() {
                    findings.push(format!(
                        "{ctx}.index.rules[{j}].state[{k}]: key and resource must be non-empty"
                    ));
                }
            }
        }
    }

    if let Some(default) = &server.default {
        check_file(&default.file, &format!("{ctx}.default.file"), findings);
    }
}

fn validate_fetcher(fetcher: &FetcherConfig, findings: &mut Vec<String>) {
    for (i, resource) in fetcher.resources.iter().enumerate() {
        if resource.name.is_empty() {
            findings.push(format!("fetcher.resources[{i}].name: must be non-empty"));
        }
        if resource.url.is_empty() {
            findings.push(format!("fetcher.resources[{i}].url: must be non-empty"));
        }
    }
    for (i, template) in fetcher.templates.iter().enumerate() {
        if template.name.is_empty() {
            findings.push(format!("fetcher.templates[{i}].name: must be non-empty"));
        }
    }
    if let Some(tls) = &fetcher.request_tls {
        if tls.cert_file.is_some() != tls.key_file.is_some() {
            findings
                .push("fetcher.request_tls: cert_file and key_file must be set together".to_string());
        }
    }
}

fn validate_loader(config: &Config, findings: &mut Vec<String>) {
    let loader = &config.loader;
    if loader.exec_workers == 0 {
        findings.push("loader.exec_workers: must be at least 1".to_string());
    }
    if loader.exec_interval == 0 {
        findings.push("loader.exec_interval: must be at least 1 second".to_string());
    }

    let template_names: Vec<&str> = config
        .fetcher
        .templates
        .iter()
        .map(|t| t.name.as_str())
        .collect();

    for (i, rule) in loader.rules.iter().enumerate() {
        match rule {
            LoaderRuleConfig::Static { resource, .. } => {
                if resource.is_empty() {
                    findings.push(format!("loader.rules[{i}].resource: must be non-empty"));
                }
            }
            LoaderRuleConfig::Single {
                resource,
                item_template,
                item_resource,
                ..
            }
            | LoaderRuleConfig::List {
                resource,
                item_template,
                item_resource,
                ..
            } => {
                if resource.is_empty() {
                    findings.push(format!("loader.rules[{i}].resource: must be non-empty"));
                }
                if item_resource.is_empty() {
                    findings.push(format!("loader.rules[{i}].item_resource: must be non-empty"));
                }
                if !template_names.contains(&item_template.as_str()) {
                    findings.push(format!(
                        "loader.rules[{i}].item_template: unknown template '{item_template}'"
                    ));
                }
            }
        }
    }
}

fn check_regex(pattern: &str, field: &str, findings: &mut Vec<String>) {
    if let Err(e) = Regex::new(pattern) {
        findings.push(format!("{field}: invalid regex: {e}"));
    }
}

fn check_file(path: &Path, field: &str, findings: &mut Vec<String>) {
    if !path.is_file() {
        findings.push(format!("{field}: no such file: {}", path.display()));
    }
}
