//! The index renderer: rule-matched state assembly, pooled bundle execution
//! and response templating.
//!
//! Per request it matches rules in declaration order, assembles the keyed
//! state bundle from cached fetch results, runs the client bundle in a pooled
//! VM against that state, splices the captured effects into the HTML template
//! and optionally caches the finished response by request path.

use crate::cache::Cache;
use crate::config::IndexConfig;
use crate::error::Error;
use crate::fetcher::Fetcher;
use crate::render::{RenderContext, RenderOutput, Renderer};
use crate::substitute::{substitute, Params};
use crate::vm::{AttributeMap, VmContext, VmEffects, VmPool};
use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use regex::{Captures, Regex};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tracing::debug;

/// One state entry rendered into the server and client state maps.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StateValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loading: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl StateValue {
    fn response(body: String) -> Self {
        Self {
            loading: None,
            error: None,
            response: Some(body),
        }
    }

    fn error(message: &str) -> Self {
        Self {
            loading: None,
            error: Some(message.to_string()),
            response: None,
        }
    }

    fn loading() -> Self {
        Self {
            loading: Some(true),
            error: None,
            response: None,
        }
    }
}

type StateMap = IndexMap<String, StateValue>;

struct CompiledRule {
    regex: Regex,
    entries: Vec<crate::config::StateEntryConfig>,
    last: bool,
}

/// File contents published as an immutable snapshot; concurrent renders keep
/// whatever snapshot they already hold.
struct LoadedFile {
    contents: String,
    modified: SystemTime,
}

struct FileCache {
    path: PathBuf,
    current: RwLock<Option<Arc<LoadedFile>>>,
}

impl FileCache {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            current: RwLock::new(None),
        }
    }

    fn origin(&self) -> String {
        self.path.display().to_string()
    }

    /// Returns the cached copy, re-reading only when the file mtime is newer.
    fn read(&self) -> Result<Arc<LoadedFile>, Error> {
        let metadata = std::fs::metadata(&self.path)
            .map_err(|e| Error::RenderTemplate(format!("{}: {e}", self.path.display())))?;
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        if let Some(current) = self
            .current
            .read()
            .expect("file cache lock poisoned")
            .clone()
        {
            if current.modified >= modified {
                return Ok(current);
            }
        }

        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::RenderTemplate(format!("{}: {e}", self.path.display())))?;
        let loaded = Arc::new(LoadedFile { contents, modified });
        *self.current.write().expect("file cache lock poisoned") = Some(Arc::clone(&loaded));
        Ok(loaded)
    }
}

pub struct IndexRenderer {
    rules: Vec<CompiledRule>,
    html: FileCache,
    bundle: Option<FileCache>,
    env: String,
    container: String,
    state_id: String,
    timeout: Duration,
    server_addr: String,
    server_port: u16,
    fetcher: Arc<Fetcher>,
    pool: Arc<VmPool>,
    cache: Option<Cache<RenderOutput>>,
    cache_ttl: Duration,
}

impl IndexRenderer {
    /// Compiles the rule regexes once.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` on an invalid rule pattern.
    pub fn new(
        config: &IndexConfig,
        server_addr: String,
        server_port: u16,
        fetcher: Arc<Fetcher>,
        pool: Arc<VmPool>,
    ) -> Result<Self, Error> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let regex = Regex::new(&rule.path)
                .map_err(|e| Error::invalid_config(format!("index rule '{}': {e}", rule.path)))?;
            rules.push(CompiledRule {
                regex,
                entries: rule.state.clone(),
                last: rule.last,
            });
        }

        Ok(Self {
            rules,
            html: FileCache::new(config.html.clone()),
            bundle: config.bundle.clone().map(FileCache::new),
            env: config.env.clone(),
            container: config.container.clone(),
            state_id: config.state.clone(),
            timeout: Duration::from_secs(config.timeout),
            server_addr,
            server_port,
            fetcher,
            pool,
            cache: (config.cache && config.cache_ttl > 0).then(Cache::new),
            cache_ttl: Duration::from_secs(config.cache_ttl),
        })
    }

    /// Evaluates all matching rules into the two state maps; returns whether
    /// any rule matched and whether the render stayed valid.
    fn assemble_state(
        &self,
        path: &str,
        server_state: &mut Option<StateMap>,
        client_state: &mut Option<StateMap>,
    ) -> (bool, bool) {
        let mut matched = false;
        let mut valid = true;

        for rule in &self.rules {
            let Some(captures) = rule.regex.captures(path) else {
                continue;
            };
            matched = true;
            let params = params_from_captures(&rule.regex, &captures);

            for entry in &rule.entries {
                let key = substitute(&entry.key, &params);
                let resource = substitute(&entry.resource, &params);
                let value = match self.fetcher.get(&resource) {
                    Ok(bytes) => {
                        StateValue::response(String::from_utf8_lossy(&bytes).into_owned())
                    }
                    Err(Error::ResourceUnknown(_)) => {
                        valid = false;
                        StateValue::error("unknown resource")
                    }
                    Err(_) => {
                        valid = false;
                        StateValue::loading()
                    }
                };
                server_state
                    .get_or_insert_with(StateMap::new)
                    .insert(key.clone(), value.clone());
                if entry.export {
                    client_state
                        .get_or_insert_with(StateMap::new)
                        .insert(key, value);
                }
            }

            if rule.last {
                break;
            }
        }

        (matched, valid)
    }

    async fn run_bundle(
        &self,
        bundle: &FileCache,
        path: &str,
        server_state: Option<&StateMap>,
    ) -> Result<VmEffects, Error> {
        let source = bundle.read()?;
        let state_json = server_state
            .map(serde_json::to_string)
            .transpose()?;

        let vm_ctx = VmContext {
            env: self.env.clone(),
            addr: self.server_addr.clone(),
            port: self.server_port,
            version: env!("CARGO_PKG_VERSION").to_string(),
            url: path.to_string(),
            server_state: state_json,
        };

        let mut lease = self.pool.get().await?;
        lease.configure(vm_ctx).await?;
        lease
            .execute(&bundle.origin(), &source.contents, self.timeout)
            .await
    }

    fn store(&self, path: &str, output: &RenderOutput) {
        if let Some(cache) = &self.cache {
            cache.set(path, output.clone(), self.cache_ttl);
        }
    }
}

#[async_trait]
impl Renderer for IndexRenderer {
    fn name(&self) -> &'static str {
        "index"
    }

    async fn handle(&self, ctx: &mut RenderContext) -> Result<Option<RenderOutput>, Error> {
        // Query strings are not part of the key.
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&ctx.path) {
                debug!(path = %ctx.path, "render cache hit; replaying stored headers");
                return Ok(Some(hit));
            }
        }

        let mut server_state: Option<StateMap> = None;
        let mut client_state: Option<StateMap> = None;
        let (matched, valid) =
            self.assemble_state(&ctx.path, &mut server_state, &mut client_state);

        // Path-based delegation: rules exist, none matched, nothing to
        // execute. An index with no rules at all still serves every path.
        if self.bundle.is_none() && !self.rules.is_empty() && !matched {
            return Ok(None);
        }

        let html = self.html.read()?;

        let effects = match &self.bundle {
            Some(bundle) => {
                self.run_bundle(bundle, &ctx.path, server_state.as_ref())
                    .await?
            }
            None => VmEffects::default(),
        };

        if let Some(redirect) = &effects.redirect {
            let mut output = RenderOutput::redirect(redirect.status, &redirect.url);
            for (name, value) in &effects.headers {
                output.headers.push((name.clone(), value.clone()));
            }
            if valid {
                self.store(&ctx.path, &output);
            }
            return Ok(Some(output));
        }

        let body = compose(
            &html.contents,
            &self.container,
            &self.state_id,
            &effects,
            client_state.as_ref(),
        )?;

        let status = if valid {
            effects.status.unwrap_or(200)
        } else {
            503
        };

        let mut output = RenderOutput::new(status, "text/html; charset=utf-8", Bytes::from(body));
        for (name, value) in &effects.headers {
            output.headers.push((name.clone(), value.clone()));
        }
        if valid {
            self.store(&ctx.path, &output);
        }
        Ok(Some(output))
    }
}

/// Positional groups populate `params["1"]`, `params["2"]`, …; named groups
/// are inserted afterwards so they take precedence on collision.
fn params_from_captures(regex: &Regex, captures: &Captures<'_>) -> Params {
    let mut params = Params::new();
    for i in 1..captures.len() {
        if let Some(group) = captures.get(i) {
            params.insert(i.to_string(), group.as_str().to_string());
        }
    }
    for name in regex.capture_names().flatten() {
        if let Some(group) = captures.name(name) {
            params.insert(name.to_string(), group.as_str().to_string());
        }
    }
    params
}

/// Applies the template splices in order; each one touches at most the first
/// occurrence of its marker.
fn compose(
    template: &str,
    container: &str,
    state_id: &str,
    effects: &VmEffects,
    client_state: Option<&StateMap>,
) -> Result<String, Error> {
    let mut html = template.to_string();

    if let Some(render) = &effects.render {
        let needle = format!("<div id=\"{container}\"></div>");
        let replacement = format!("<div id=\"{container}\">{render}</div>");
        html = html.replacen(&needle, &replacement, 1);
    }

    if let Some(state) = client_state {
        let json = serde_json::to_string(state)?;
        let tag = format!("<script id=\"{state_id}\" type=\"application/json\">{json}</script>");
        html = insert_before(&html, "</body>", &tag);
    }

    if let Some(title) = effects.title.as_deref().filter(|t| !t.is_empty()) {
        html = insert_before(&html, "</head>", &format!("<title>{title}</title>"));
    }

    for (id, attrs) in effects.metas.iter() {
        html = insert_before(&html, "</head>", &element_tag("meta", id, attrs));
    }
    for (id, attrs) in effects.links.iter() {
        html = insert_before(&html, "</head>", &element_tag("link", id, attrs));
    }
    for (id, attrs) in effects.scripts.iter() {
        html = insert_before(&html, "</head>", &element_tag("script", id, attrs));
    }

    Ok(html)
}

fn insert_before(html: &str, marker: &str, insertion: &str) -> String {
    match html.find(marker) {
        Some(pos) => {
            let mut out = String::with_capacity(html.len() + insertion.len());
            out.push_str(&html[..pos]);
            out.push_str(insertion);
            out.push_str(&html[pos..]);
            out
        }
        None => html.to_string(),
    }
}

/// Emits one head element. Attribute order is declaration order; for
/// `<script>` the `children` attribute becomes inner text.
fn element_tag(tag: &str, id: &str, attrs: &AttributeMap) -> String {
    let mut out = format!("<{tag} id=\"{id}\"");
    for (name, value) in attrs {
        if tag == "script" && name == "children" {
            continue;
        }
        out.push_str(&format!(" {name}=\"{value}\""));
    }
    if tag == "script" {
        out.push('>');
        if let Some(children) = attrs.get("children") {
            out.push_str(children);
        }
        out.push_str("</script>");
    } else {
        out.push_str("/>");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::ElementList;

    const TEMPLATE: &str =
        "<html><head></head><body><div id=\"root\"></div></body></html>";

    fn attrs(pairs: &[(&str, &str)]) -> AttributeMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn passthrough_without_effects_or_state() {
        let html = compose(TEMPLATE, "root", "state", &VmEffects::default(), None).unwrap();
        assert_eq!(html, TEMPLATE);
    }

    #[test]
    fn render_replaces_container_once() {
        let effects = VmEffects {
            render: Some("HELLO".to_string()),
            ..VmEffects::default()
        };
        let html = compose(TEMPLATE, "root", "state", &effects, None).unwrap();
        assert_eq!(html.matches("<div id=\"root\">HELLO</div>").count(), 1);
    }

    #[test]
    fn client_state_inserted_before_body_close() {
        let mut state = StateMap::new();
        state.insert(
            "user-42".to_string(),
            StateValue::response("{\"name\":\"ada\"}".to_string()),
        );
        let html = compose(TEMPLATE, "root", "state", &VmEffects::default(), Some(&state)).unwrap();
        assert!(html.ends_with(
            "<script id=\"state\" type=\"application/json\">{\"user-42\":{\"response\":\"{\\\"name\\\":\\\"ada\\\"}\"}}</script></body></html>"
        ));
    }

    #[test]
    fn title_and_elements_inserted_before_head_close() {
        let mut metas = ElementList::new();
        metas.insert("desc", attrs(&[("name", "description"), ("content", "hi")]));
        let mut scripts = ElementList::new();
        scripts.insert("boot", attrs(&[("src", "/boot.js"), ("children", "go();")]));
        let effects = VmEffects {
            title: Some("Home".to_string()),
            metas,
            scripts,
            ..VmEffects::default()
        };
        let html = compose(TEMPLATE, "root", "state", &effects, None).unwrap();
        let head_end = html.find("</head>").unwrap();
        let head = &html[..head_end];
        assert!(head.contains("<title>Home</title>"));
        assert!(head.contains("<meta id=\"desc\" name=\"description\" content=\"hi\"/>"));
        assert!(head.contains("<script id=\"boot\" src=\"/boot.js\">go();</script>"));
        let title_pos = head.find("<title>").unwrap();
        let meta_pos = head.find("<meta").unwrap();
        assert!(title_pos < meta_pos);
    }

    #[test]
    fn empty_title_not_inserted() {
        let effects = VmEffects {
            title: Some(String::new()),
            ..VmEffects::default()
        };
        let html = compose(TEMPLATE, "root", "state", &effects, None).unwrap();
        assert!(!html.contains("<title>"));
    }

    #[test]
    fn missing_markers_are_no_ops() {
        let bare = "<div id=\"root\"></div>";
        let mut state = StateMap::new();
        state.insert("k".to_string(), StateValue::loading());
        let effects = VmEffects {
            title: Some("t".to_string()),
            ..VmEffects::default()
        };
        let html = compose(bare, "root", "state", &effects, Some(&state)).unwrap();
        assert_eq!(html, bare);
    }

    #[test]
    fn capture_params_positional_and_named() {
        let regex = Regex::new(r"/u/(?P<id>\d+)/(\w+)").unwrap();
        let captures = regex.captures("/u/42/profile").unwrap();
        let params = params_from_captures(&regex, &captures);
        assert_eq!(params.get("id"), Some(&"42".to_string()));
        assert_eq!(params.get("1"), Some(&"42".to_string()));
        assert_eq!(params.get("2"), Some(&"profile".to_string()));
    }

    #[test]
    fn state_value_serialization_shapes() {
        assert_eq!(
            serde_json::to_string(&StateValue::response("x".to_string())).unwrap(),
            "{\"response\":\"x\"}"
        );
        assert_eq!(
            serde_json::to_string(&StateValue::error("unknown resource")).unwrap(),
            "{\"error\":\"unknown resource\"}"
        );
        assert_eq!(
            serde_json::to_string(&StateValue::loading()).unwrap(),
            "{\"loading\":true}"
        );
    }

    #[test]
    fn file_cache_reloads_on_newer_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.html");
        std::fs::write(&path, "one").unwrap();
        let cache = FileCache::new(path.clone());
        assert_eq!(cache.read().unwrap().contents, "one");

        // Force a strictly newer mtime; coarse filesystem clocks need the
        // explicit bump.
        std::fs::write(&path, "two").unwrap();
        let newer = SystemTime::now() + Duration::from_secs(2);
        let file = std::fs::File::options().append(true).open(&path).unwrap();
        file.set_modified(newer).unwrap();
        drop(file);
        assert_eq!(cache.read().unwrap().contents, "two");
    }

    #[test]
    fn file_cache_missing_file_is_template_error() {
        let cache = FileCache::new(PathBuf::from("/nonexistent/site/index.html"));
        assert!(matches!(cache.read(), Err(Error::RenderTemplate(_))));
    }
}
