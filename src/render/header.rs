//! Response-header shaping. Records set/add/remove operations for matching
//! rules; never terminates the chain.

use crate::config::HeaderConfig;
use crate::error::Error;
use crate::render::{HeaderOp, RenderContext, RenderOutput, Renderer};
use async_trait::async_trait;
use indexmap::IndexMap;
use regex::Regex;

struct HeaderRule {
    regex: Regex,
    set: IndexMap<String, String>,
    add: IndexMap<String, String>,
    remove: Vec<String>,
    last: bool,
}

pub struct HeaderRenderer {
    rules: Vec<HeaderRule>,
}

impl HeaderRenderer {
    /// Compiles the rule regexes once.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` on an invalid pattern.
    pub fn new(config: &HeaderConfig) -> Result<Self, Error> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let regex = Regex::new(&rule.path)
                .map_err(|e| Error::invalid_config(format!("header rule '{}': {e}", rule.path)))?;
            rules.push(HeaderRule {
                regex,
                set: rule.set.clone(),
                add: rule.add.clone(),
                remove: rule.remove.clone(),
                last: rule.last,
            });
        }
        Ok(Self { rules })
    }
}

#[async_trait]
impl Renderer for HeaderRenderer {
    fn name(&self) -> &'static str {
        "header"
    }

    async fn handle(&self, ctx: &mut RenderContext) -> Result<Option<RenderOutput>, Error> {
        for rule in &self.rules {
            if !rule.regex.is_match(&ctx.path) {
                continue;
            }
            for (name, value) in &rule.set {
                ctx.header_ops.push(HeaderOp::Set(name.clone(), value.clone()));
            }
            for (name, value) in &rule.add {
                ctx.header_ops.push(HeaderOp::Add(name.clone(), value.clone()));
            }
            for name in &rule.remove {
                ctx.header_ops.push(HeaderOp::Remove(name.clone()));
            }
            if rule.last {
                break;
            }
        }
        Ok(None)
    }
}
