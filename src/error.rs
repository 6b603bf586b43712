//! Error handling for the neon server.
//!
//! All recoverable failures are surfaced as typed `Error` values and logged at
//! the component boundary; only startup failures (configuration, bind, TLS
//! material) terminate the process, from `main`.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration validation report. Never retried; the process exits
    /// non-zero.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Transport or HTTP failure after the retry policy was exhausted.
    #[error("fetch failed for resource '{name}': {reason}")]
    Fetch { name: String, reason: String },

    /// The resource name was never registered with the fetcher.
    #[error("unknown resource: {0}")]
    ResourceUnknown(String),

    /// The resource is registered but has no live cache entry.
    #[error("resource not loaded: {0}")]
    ResourceNotLoaded(String),

    /// The template name was never registered with the fetcher.
    #[error("unknown template: {0}")]
    TemplateUnknown(String),

    /// The bundle threw, failed to compile, or the VM died.
    #[error("execution error in '{origin}': {reason}")]
    VmExecution { origin: String, reason: String },

    /// The bundle did not return within the configured deadline.
    #[error("execution timed out after {0:?}")]
    VmTimeout(Duration),

    /// A referenced HTML template or bundle file is missing or unreadable.
    #[error("render template invalid: {0}")]
    RenderTemplate(String),
}

impl Error {
    /// Creates a configuration error from a validation report.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a fetch error for a named resource.
    #[must_use]
    pub fn fetch_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fetch {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a VM execution error tagged with the bundle origin.
    #[must_use]
    pub fn vm_execution(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::VmExecution {
            origin: origin.into(),
            reason: reason.into(),
        }
    }

    /// True for the state-entry failures that mark a render invalid.
    #[must_use]
    pub const fn marks_render_invalid(&self) -> bool {
        matches!(self, Self::ResourceUnknown(_) | Self::ResourceNotLoaded(_))
    }
}
