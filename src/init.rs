//! `neon init`: scaffolds a runnable default configuration and site.

use crate::error::Error;
use std::path::Path;

const DEFAULT_CONFIG: &str = r#"server:
  - listen_addr: 0.0.0.0
    listen_port: 8080
    robots:
      hosts: []
      sitemaps: []
      cache: true
    index:
      html: site/index.html
      bundle: site/main.js
      container: root
      state: state
      cache: false
      rules:
        - path: "^/"
          state: []
    default:
      file: site/index.html
      status_code: 200
fetcher:
  request_headers:
    User-Agent: neon
  resources: []
  templates: []
loader:
  rules: []
"#;

const DEFAULT_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8"/>
</head>
<body>
<div id="root"></div>
</body>
</html>
"#;

const DEFAULT_BUNDLE: &str = r#"setTitle("neon");
setRender("<h1>It works</h1>");
"#;

/// Writes `neon.yaml` and the `site/` starter files under `dir`. Existing
/// files are never overwritten.
///
/// # Errors
///
/// Returns `Error::Config` when a target file already exists and `Error::Io`
/// on write failure.
pub fn scaffold(dir: &Path) -> Result<(), Error> {
    let site = dir.join("site");
    std::fs::create_dir_all(&site)?;

    write_new(&dir.join("neon.yaml"), DEFAULT_CONFIG)?;
    write_new(&site.join("index.html"), DEFAULT_HTML)?;
    write_new(&site.join("main.js"), DEFAULT_BUNDLE)?;
    Ok(())
}

fn write_new(path: &Path, contents: &str) -> Result<(), Error> {
    if path.exists() {
        return Err(Error::invalid_config(format!(
            "refusing to overwrite existing file: {}",
            path.display()
        )));
    }
    std::fs::write(path, contents)?;
    Ok(())
}
