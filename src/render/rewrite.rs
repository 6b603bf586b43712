//! Path rewriting: redirect out of the chain or mutate the request path for
//! the renderers downstream.

use crate::config::{RewriteConfig, RewriteFlag};
use crate::error::Error;
use crate::render::{RenderContext, RenderOutput, Renderer};
use async_trait::async_trait;
use regex::Regex;

struct RewriteRule {
    regex: Regex,
    replace: String,
    flag: Option<RewriteFlag>,
    last: bool,
}

pub struct RewriteRenderer {
    rules: Vec<RewriteRule>,
}

impl RewriteRenderer {
    /// Compiles the rule regexes once.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` on an invalid pattern.
    pub fn new(config: &RewriteConfig) -> Result<Self, Error> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let regex = Regex::new(&rule.path)
                .map_err(|e| Error::invalid_config(format!("rewrite rule '{}': {e}", rule.path)))?;
            rules.push(RewriteRule {
                regex,
                replace: rule.replace.clone(),
                flag: rule.flag,
                last: rule.last,
            });
        }
        Ok(Self { rules })
    }
}

fn is_absolute(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[async_trait]
impl Renderer for RewriteRenderer {
    fn name(&self) -> &'static str {
        "rewrite"
    }

    async fn handle(&self, ctx: &mut RenderContext) -> Result<Option<RenderOutput>, Error> {
        for rule in &self.rules {
            if !rule.regex.is_match(&ctx.path) {
                continue;
            }
            let status = match rule.flag {
                Some(RewriteFlag::Permanent) => Some(301),
                Some(RewriteFlag::Redirect) => Some(302),
                None if is_absolute(&rule.replace) => Some(302),
                None => None,
            };
            if let Some(status) = status {
                return Ok(Some(RenderOutput::redirect(status, &rule.replace)));
            }
            ctx.path = rule.replace.clone();
            if rule.last {
                break;
            }
        }
        Ok(None)
    }
}
