//! Static file resolution: the cached index page, map images and web assets.
//!
//! Files come from two directories supplied by the host application: the
//! content root (map images, optionally under `Images/`) and the web-asset
//! root (the browser client). Images that are not on disk can be served from
//! an [`EmbeddedAssets`] source compiled into the host binary.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::Mutex;

/// File name of the index document inside the web-asset root.
pub const INDEX_FILE: &str = "index.html";

/// Subdirectory of the content root searched for images.
pub const IMAGES_DIR: &str = "Images";

/// Path prefix that clients may use for web assets.
const WEB_ASSETS_PREFIX: &str = "WebAssets/";

/// Outcome of a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Found {
        body: Vec<u8>,
        content_type: &'static str,
    },
    NotFound,
    /// The name tried to escape its directory.
    Forbidden,
    /// The file exists but could not be read.
    Unavailable,
}

/// Secondary byte source for images, looked up by file name.
pub trait EmbeddedAssets: Send + Sync + 'static {
    fn get(&self, name: &str) -> Option<Cow<'static, [u8]>>;
}

/// Embedded source with nothing in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEmbeddedAssets;

impl EmbeddedAssets for NoEmbeddedAssets {
    fn get(&self, _name: &str) -> Option<Cow<'static, [u8]>> {
        None
    }
}

/// Embedded source backed by `include_bytes!` data.
#[derive(Debug, Clone, Default)]
pub struct StaticAssets {
    entries: HashMap<String, &'static [u8]>,
}

impl StaticAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, bytes: &'static [u8]) -> Self {
        self.entries.insert(name.into(), bytes);
        self
    }
}

impl EmbeddedAssets for StaticAssets {
    fn get(&self, name: &str) -> Option<Cow<'static, [u8]>> {
        self.entries.get(name).map(|b| Cow::Borrowed(*b))
    }
}

struct CachedIndex {
    modified: SystemTime,
    body: Arc<[u8]>,
}

/// Resolves request paths to file contents.
pub struct AssetStore {
    content_root: PathBuf,
    web_root: PathBuf,
    embedded: Arc<dyn EmbeddedAssets>,
    index: Mutex<Option<CachedIndex>>,
}

impl AssetStore {
    pub fn new(content_root: PathBuf, web_root: PathBuf) -> Self {
        Self {
            content_root,
            web_root,
            embedded: Arc::new(NoEmbeddedAssets),
            index: Mutex::new(None),
        }
    }

    /// Replaces the embedded fallback source for images.
    pub fn with_embedded(mut self, embedded: Arc<dyn EmbeddedAssets>) -> Self {
        self.embedded = embedded;
        self
    }

    pub fn web_root(&self) -> &Path {
        &self.web_root
    }

    /// Returns the index document, re-reading it whenever its modification
    /// time changes.
    pub async fn index(&self) -> Resolved {
        let path = self.web_root.join(INDEX_FILE);
        let modified = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta.modified().ok(),
            Ok(_) => return Resolved::NotFound,
            Err(e) if e.kind() == ErrorKind::NotFound => return Resolved::NotFound,
            Err(e) => {
                tracing::debug!(path = %path.display(), "index unavailable: {e}");
                return Resolved::Unavailable;
            }
        };

        let mut cache = self.index.lock().await;
        if let (Some(cached), Some(modified)) = (cache.as_ref(), modified) {
            if cached.modified == modified {
                return Resolved::Found {
                    body: cached.body.to_vec(),
                    content_type: "text/html; charset=utf-8",
                };
            }
        }

        match read_file(&path).await {
            Resolved::Found { body, content_type } => {
                // Without a modification time there is nothing to validate
                // the cache against, so it stays empty.
                *cache = modified.map(|modified| CachedIndex {
                    modified,
                    body: Arc::from(body.as_slice()),
                });
                tracing::debug!(bytes = body.len(), "index document loaded");
                Resolved::Found { body, content_type }
            }
            other => {
                *cache = None;
                other
            }
        }
    }

    /// Resolves a map image by bare file name.
    ///
    /// Looks in the content root, then its `Images/` subdirectory, then the
    /// embedded source.
    pub async fn image(&self, name: &str) -> Resolved {
        if name.trim().is_empty() {
            return Resolved::NotFound;
        }
        if !is_bare_file_name(name) {
            tracing::debug!(name, "rejecting image name with path components");
            return Resolved::Forbidden;
        }

        let candidates = [
            self.content_root.join(name),
            self.content_root.join(IMAGES_DIR).join(name),
        ];
        for candidate in &candidates {
            match read_file(candidate).await {
                Resolved::NotFound => continue,
                other => return other,
            }
        }

        match self.embedded.get(name) {
            Some(bytes) => Resolved::Found {
                body: bytes.into_owned(),
                content_type: content_type_for(Path::new(name)),
            },
            None => Resolved::NotFound,
        }
    }

    /// Resolves a path under the web-asset root.
    ///
    /// Any `..` segment, or a path that would land outside the root, is
    /// treated as not found.
    pub async fn web_asset(&self, requested: &str) -> Resolved {
        let normalized = requested.replace('\\', "/");
        let relative = strip_prefix_ignore_case(&normalized, WEB_ASSETS_PREFIX);
        if relative.is_empty() || relative.split('/').any(|segment| segment == "..") {
            return Resolved::NotFound;
        }

        let full = self.web_root.join(relative);
        if !full.starts_with(&self.web_root) {
            tracing::debug!(requested, "rejecting asset path outside web root");
            return Resolved::NotFound;
        }
        read_file(&full).await
    }
}

fn is_bare_file_name(name: &str) -> bool {
    let normalized = name.replace('\\', "/");
    Path::new(&normalized)
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n == normalized)
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> &'a str {
    match s.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => &s[prefix.len()..],
        _ => s,
    }
}

async fn read_file(path: &Path) -> Resolved {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Resolved::NotFound,
        Err(e) if e.kind() == ErrorKind::NotFound => return Resolved::NotFound,
        Err(e) => {
            tracing::debug!(path = %path.display(), "file unavailable: {e}");
            return Resolved::Unavailable;
        }
    }

    match tokio::fs::read(path).await {
        Ok(body) => Resolved::Found {
            body,
            content_type: content_type_for(path),
        },
        Err(e) if e.kind() == ErrorKind::NotFound => Resolved::NotFound,
        Err(e) => {
            tracing::debug!(path = %path.display(), "file unavailable: {e}");
            Resolved::Unavailable
        }
    }
}

/// Maps a file extension to a `Content-Type`.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("json") => "application/json",
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fixture() -> (tempfile::TempDir, AssetStore) {
        let dir = tempfile::tempdir().unwrap();
        let content = dir.path().join("content");
        let web = content.join("WebAssets");
        std::fs::create_dir_all(web.join("js")).unwrap();
        std::fs::create_dir_all(content.join(IMAGES_DIR)).unwrap();

        std::fs::write(web.join(INDEX_FILE), "<html>v1</html>").unwrap();
        std::fs::write(web.join("js").join("app.js"), "console.log(1)").unwrap();
        std::fs::write(content.join("R5A1.png"), b"root-png").unwrap();
        std::fs::write(content.join(IMAGES_DIR).join("R5B1.png"), b"images-png").unwrap();
        std::fs::write(dir.path().join("secret.txt"), "secret").unwrap();

        let store = AssetStore::new(content, web);
        (dir, store)
    }

    fn body(resolved: Resolved) -> Vec<u8> {
        match resolved {
            Resolved::Found { body, .. } => body,
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn index_cached_until_modified_time_changes() {
        let (_dir, store) = fixture();
        let path = store.web_root().join(INDEX_FILE);

        assert_eq!(body(store.index().await), b"<html>v1</html>");
        let original = std::fs::metadata(&path).unwrap().modified().unwrap();

        // Same timestamp: the cached copy wins even though the bytes changed.
        std::fs::write(&path, "<html>v2</html>").unwrap();
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(original).unwrap();
        assert_eq!(body(store.index().await), b"<html>v1</html>");

        file.set_modified(original + Duration::from_secs(10)).unwrap();
        assert_eq!(body(store.index().await), b"<html>v2</html>");
    }

    #[tokio::test]
    async fn missing_index_is_not_found() {
        let (_dir, store) = fixture();
        std::fs::remove_file(store.web_root().join(INDEX_FILE)).unwrap();
        assert_eq!(store.index().await, Resolved::NotFound);
    }

    #[tokio::test]
    async fn images_resolve_from_both_directories() {
        let (_dir, store) = fixture();

        match store.image("R5A1.png").await {
            Resolved::Found { body, content_type } => {
                assert_eq!(body, b"root-png");
                assert_eq!(content_type, "image/png");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(body(store.image("R5B1.png").await), b"images-png");
        assert_eq!(store.image("missing.png").await, Resolved::NotFound);
        assert_eq!(store.image("").await, Resolved::NotFound);
    }

    #[tokio::test]
    async fn image_traversal_is_forbidden() {
        let (_dir, store) = fixture();
        assert_eq!(store.image("../secret.txt").await, Resolved::Forbidden);
        assert_eq!(store.image("..").await, Resolved::Forbidden);
        assert_eq!(store.image("Images/R5B1.png").await, Resolved::Forbidden);
        assert_eq!(store.image("..\\secret.txt").await, Resolved::Forbidden);
    }

    #[tokio::test]
    async fn embedded_fallback_after_filesystem() {
        let (_dir, store) = fixture();
        let embedded = StaticAssets::new()
            .with("marker.svg", b"<svg/>")
            .with("R5A1.png", b"embedded-png");
        let store = store.with_embedded(Arc::new(embedded));

        match store.image("marker.svg").await {
            Resolved::Found { body, content_type } => {
                assert_eq!(body, b"<svg/>");
                assert_eq!(content_type, "image/svg+xml");
            }
            other => panic!("unexpected {other:?}"),
        }
        // Disk takes precedence.
        assert_eq!(body(store.image("R5A1.png").await), b"root-png");
    }

    #[tokio::test]
    async fn unreadable_location_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("plain-file");
        std::fs::write(&not_a_dir, "x").unwrap();

        let store = AssetStore::new(not_a_dir.clone(), not_a_dir);
        assert_eq!(store.image("map.png").await, Resolved::Unavailable);
    }

    #[tokio::test]
    async fn web_assets_stay_inside_root() {
        let (_dir, store) = fixture();

        match store.web_asset("js/app.js").await {
            Resolved::Found { body, content_type } => {
                assert_eq!(body, b"console.log(1)");
                assert_eq!(content_type, "text/javascript; charset=utf-8");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(body(store.web_asset("WebAssets/js/app.js").await), b"console.log(1)");
        assert_eq!(body(store.web_asset("webassets\\js\\app.js").await), b"console.log(1)");

        assert_eq!(store.web_asset("../../secret.txt").await, Resolved::NotFound);
        assert_eq!(store.web_asset("js/../../../secret.txt").await, Resolved::NotFound);
        assert_eq!(store.web_asset("/etc/passwd").await, Resolved::NotFound);
        assert_eq!(store.web_asset("js").await, Resolved::NotFound);
        assert_eq!(store.web_asset("").await, Resolved::NotFound);
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for(Path::new("a.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("a.json")), "application/json");
        assert_eq!(content_type_for(Path::new("noext")), "application/octet-stream");
    }
}
