//! Static asset resolution against the publish directory.
//!
//! A request path maps to an ordered list of candidates: the path itself,
//! then the pretty-URL alternatives (`.html`, `index.html` and friends).
//! The first candidate that exists as a regular file wins.

use std::path::{Component, Path, PathBuf};

use crate::functions::registry::is_canonical_function_path;

const ASSET_EXTENSIONS: &[&str] = &[
    "html", "htm", "png", "jpg", "js", "css", "svg", "gif", "ico", "woff", "woff2",
];

/// Fallback body when the site has no `404.html`.
pub const NOT_FOUND_BODY: &str = "Not Found";

/// Pretty-URL alternatives for a decoded request path.
pub fn alternative_paths_for(path: &str) -> Vec<String> {
    if is_canonical_function_path(path) {
        return Vec::new();
    }

    if let Some(base) = path.strip_suffix('/') {
        let mut paths = Vec::new();
        if !base.is_empty() {
            paths.push(format!("{}.html", base));
            paths.push(format!("{}.htm", base));
        }
        paths.push(format!("{}index.html", path));
        paths.push(format!("{}index.htm", path));
        return paths;
    }

    if has_asset_extension(path) {
        return Vec::new();
    }

    vec![
        format!("{}.html", path),
        format!("{}.htm", path),
        format!("{}/index.html", path),
        format!("{}/index.htm", path),
    ]
}

fn has_asset_extension(path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or(path);
    match last.rsplit_once('.') {
        Some((_, ext)) => ASSET_EXTENSIONS.contains(&ext),
        None => false,
    }
}

/// Map a URL path onto the publish directory, refusing anything that escapes it.
pub fn safe_join(publish_dir: &Path, url_path: &str) -> Option<PathBuf> {
    let mut joined = publish_dir.to_path_buf();
    for component in Path::new(url_path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(joined)
}

/// First existing file among the path and its alternatives, as `/relative/path`.
pub async fn resolve(publish_dir: &Path, path: &str) -> Option<String> {
    let candidates = std::iter::once(path.to_string()).chain(alternative_paths_for(path));
    for candidate in candidates {
        let Some(full) = safe_join(publish_dir, &candidate) else {
            continue;
        };
        if let Ok(meta) = tokio::fs::metadata(&full).await {
            if meta.is_file() {
                let relative = full.strip_prefix(publish_dir).ok()?;
                let mut out = String::from("/");
                out.push_str(&relative.to_string_lossy().replace('\\', "/"));
                return Some(out);
            }
        }
    }
    None
}

/// Contents of the site's `404.html`, or a plain fallback.
pub async fn render_404(publish_dir: &Path) -> String {
    let path = publish_dir.join("404.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(body) => body,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = ?path, error = %e, "Could not read 404 page");
            }
            NOT_FOUND_BODY.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternatives_for_directory_paths() {
        assert_eq!(
            alternative_paths_for("/docs/"),
            vec!["/docs.html", "/docs.htm", "/docs/index.html", "/docs/index.htm"]
        );
        assert_eq!(alternative_paths_for("/"), vec!["/index.html", "/index.htm"]);
    }

    #[test]
    fn alternatives_for_extensionless_paths() {
        assert_eq!(
            alternative_paths_for("/about"),
            vec!["/about.html", "/about.htm", "/about/index.html", "/about/index.htm"]
        );
        assert!(alternative_paths_for("/app.js").is_empty());
        assert!(alternative_paths_for("/logo.png").is_empty());
        assert_eq!(alternative_paths_for("/data.json").len(), 4);
    }

    #[test]
    fn function_paths_have_no_alternatives() {
        assert!(alternative_paths_for("/.netlify/functions/hello").is_empty());
    }

    #[test]
    fn refuses_traversal() {
        assert!(safe_join(Path::new("/site"), "/../etc/passwd").is_none());
        assert_eq!(safe_join(Path::new("/site"), "/a/./b").unwrap(), Path::new("/site/a/b"));
    }

    #[tokio::test]
    async fn resolves_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("about")).unwrap();
        std::fs::write(dir.path().join("about/index.html"), "<p>about</p>").unwrap();
        std::fs::write(dir.path().join("index.html"), "home").unwrap();

        assert_eq!(resolve(dir.path(), "/about").await.as_deref(), Some("/about/index.html"));
        assert_eq!(resolve(dir.path(), "/").await.as_deref(), Some("/index.html"));
        assert_eq!(resolve(dir.path(), "/index.html").await.as_deref(), Some("/index.html"));
        assert!(resolve(dir.path(), "/missing").await.is_none());
        assert!(resolve(dir.path(), "/about/").await.is_some());
    }

    #[tokio::test]
    async fn renders_custom_or_default_404() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(render_404(dir.path()).await, NOT_FOUND_BODY);

        std::fs::write(dir.path().join("404.html"), "<h1>gone</h1>").unwrap();
        assert_eq!(render_404(dir.path()).await, "<h1>gone</h1>");
    }
}
