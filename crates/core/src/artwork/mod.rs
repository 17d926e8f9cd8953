//! Cover-art cache with conditional revalidation.
//!
//! Covers are kept in the key-value store under `cover:<url>` together with
//! the validators the source handed out. Every load revalidates; a source
//! that reports "not modified", or that fails outright, is answered from the
//! cache.

use std::{
    path::{Path, PathBuf},
    rc::Rc,
    time::UNIX_EPOCH,
};

use base64::{engine::general_purpose, Engine as _};
use futures::future::{self, FutureExt, LocalBoxFuture};
use serde::{Deserialize, Serialize};

use crate::{palette::Palette, store::KeyValueStore, Result, VisualsError};

/// Revalidation metadata sent with a fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Validators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtworkResponse {
    Fresh {
        bytes: Vec<u8>,
        validators: Validators,
    },
    NotModified,
}

/// Where cover art comes from. Implementations honour the validators the way
/// an HTTP server honours `If-None-Match` / `If-Modified-Since`.
pub trait ArtworkSource {
    fn fetch(&self, url: &str, validators: &Validators) -> LocalBoxFuture<'static, Result<ArtworkResponse>>;
}

/// Stored form of one cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedCover {
    #[serde(flatten)]
    pub validators: Validators,
    /// Standard base64 of the encoded image.
    pub data: String,
}

impl CachedCover {
    fn new(bytes: &[u8], validators: Validators) -> Self {
        Self {
            validators,
            data: general_purpose::STANDARD.encode(bytes),
        }
    }

    pub fn bytes(&self) -> Result<Vec<u8>> {
        Ok(general_purpose::STANDARD.decode(&self.data)?)
    }
}

#[derive(Clone)]
pub struct ArtworkCache {
    store: Rc<dyn KeyValueStore>,
}

impl ArtworkCache {
    pub fn new(store: Rc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn key(url: &str) -> String {
        format!("cover:{url}")
    }

    /// The cached cover for `url`. Unreadable entries count as a miss.
    pub fn cached(&self, url: &str) -> Option<CachedCover> {
        let raw = match self.store.get(&Self::key(url)) {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!(url, error = %err, "artwork cache unavailable");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(cover) => Some(cover),
            Err(err) => {
                tracing::warn!(url, error = %err, "discarding unreadable cached cover");
                None
            }
        }
    }

    /// Returns the encoded cover for `url`, revalidating against `source`.
    pub async fn load(&self, url: &str, source: &dyn ArtworkSource) -> Result<Vec<u8>> {
        let cached = self.cached(url);
        let validators = cached
            .as_ref()
            .map(|cover| cover.validators.clone())
            .unwrap_or_default();

        match source.fetch(url, &validators).await {
            Ok(ArtworkResponse::Fresh { bytes, validators }) => {
                let cover = CachedCover::new(&bytes, validators);
                if let Err(err) = self.store.put(&Self::key(url), serde_json::to_string(&cover)?) {
                    tracing::warn!(url, error = %err, "could not cache cover");
                }
                tracing::debug!(url, bytes = bytes.len(), "fetched cover");
                Ok(bytes)
            }
            Ok(ArtworkResponse::NotModified) => {
                let cover = cached.ok_or_else(|| {
                    VisualsError::msg(format!("`{url}` reported not modified but nothing is cached"))
                })?;
                tracing::debug!(url, "cover not modified, serving cache");
                cover.bytes()
            }
            Err(err) => match cached {
                Some(cover) => {
                    tracing::warn!(url, error = %err, "cover fetch failed, serving cache");
                    cover.bytes()
                }
                None => Err(err),
            },
        }
    }

    /// Loads the cover and extracts its palette.
    pub async fn palette(&self, url: &str, source: &dyn ArtworkSource) -> Result<Palette> {
        let bytes = self.load(url, source).await?;
        Palette::from_image_bytes(&bytes)
    }
}

impl std::fmt::Debug for ArtworkCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtworkCache").finish_non_exhaustive()
    }
}

/// Serves covers from the local filesystem. `file://` prefixes are accepted.
/// The entity tag is derived from file size and modification time.
#[derive(Debug, Clone, Default)]
pub struct FileArtworkSource {
    root: Option<PathBuf>,
}

impl FileArtworkSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves relative urls against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, url: &str) -> PathBuf {
        let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn fetch_now(&self, url: &str, validators: &Validators) -> Result<ArtworkResponse> {
        let path = self.resolve(url);
        let metadata = std::fs::metadata(&path)?;
        let modified = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|since| since.as_secs())
            .unwrap_or_default();

        let current = Validators {
            etag: Some(format!("\"{:x}-{:x}\"", metadata.len(), modified)),
            last_modified: Some(modified.to_string()),
        };
        if validators.etag.is_some() && validators.etag == current.etag {
            return Ok(ArtworkResponse::NotModified);
        }

        Ok(ArtworkResponse::Fresh {
            bytes: std::fs::read(&path)?,
            validators: current,
        })
    }
}

impl ArtworkSource for FileArtworkSource {
    fn fetch(&self, url: &str, validators: &Validators) -> LocalBoxFuture<'static, Result<ArtworkResponse>> {
        future::ready(self.fetch_now(url, validators)).boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, io::Cursor};

    use futures::executor::block_on;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    use super::*;
    use crate::store::MemoryStore;

    /// Source with scripted responses; records the validators it was sent.
    #[derive(Default)]
    struct Scripted {
        responses: RefCell<Vec<Result<ArtworkResponse>>>,
        seen: RefCell<Vec<Validators>>,
    }

    impl Scripted {
        fn then(self, response: Result<ArtworkResponse>) -> Self {
            self.responses.borrow_mut().push(response);
            self
        }
    }

    impl ArtworkSource for Scripted {
        fn fetch(&self, _url: &str, validators: &Validators) -> LocalBoxFuture<'static, Result<ArtworkResponse>> {
            self.seen.borrow_mut().push(validators.clone());
            let response = self.responses.borrow_mut().remove(0);
            future::ready(response).boxed_local()
        }
    }

    fn fresh(bytes: &[u8], etag: &str) -> Result<ArtworkResponse> {
        Ok(ArtworkResponse::Fresh {
            bytes: bytes.to_vec(),
            validators: Validators {
                etag: Some(etag.to_string()),
                last_modified: None,
            },
        })
    }

    fn cache() -> (Rc<MemoryStore>, ArtworkCache) {
        let memory = Rc::new(MemoryStore::new());
        let store: Rc<dyn KeyValueStore> = memory.clone();
        (memory, ArtworkCache::new(store))
    }

    fn png(rgb: [u8; 3]) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb(rgb)))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn fresh_response_is_cached_with_validators() {
        let (memory, cache) = cache();
        let source = Scripted::default().then(fresh(b"cover", "v1"));

        assert_eq!(block_on(cache.load("https://img/1", &source)).unwrap(), b"cover");
        assert!(source.seen.borrow()[0].is_empty());

        let raw = memory.get("cover:https://img/1").unwrap().unwrap();
        let stored: CachedCover = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored.validators.etag.as_deref(), Some("v1"));
        assert_eq!(stored.bytes().unwrap(), b"cover");
    }

    #[test]
    fn not_modified_serves_the_cached_copy() {
        let (_, cache) = cache();
        let source = Scripted::default()
            .then(fresh(b"cover", "v1"))
            .then(Ok(ArtworkResponse::NotModified));

        block_on(cache.load("u", &source)).unwrap();
        assert_eq!(block_on(cache.load("u", &source)).unwrap(), b"cover");
        assert_eq!(source.seen.borrow()[1].etag.as_deref(), Some("v1"));
    }

    #[test]
    fn failed_fetch_falls_back_to_cache() {
        let (_, cache) = cache();
        let source = Scripted::default()
            .then(fresh(b"cover", "v1"))
            .then(Err(VisualsError::msg("offline")))
            .then(Err(VisualsError::msg("offline")));

        block_on(cache.load("u", &source)).unwrap();
        assert_eq!(block_on(cache.load("u", &source)).unwrap(), b"cover");
        assert!(block_on(cache.load("other", &source)).is_err());
    }

    #[test]
    fn not_modified_without_cache_is_an_error() {
        let (_, cache) = cache();
        let source = Scripted::default().then(Ok(ArtworkResponse::NotModified));
        assert!(block_on(cache.load("u", &source)).is_err());
    }

    #[test]
    fn corrupt_cache_entry_is_treated_as_a_miss() {
        let (memory, cache) = cache();
        memory.put("cover:u", "{oops".to_string()).unwrap();
        let source = Scripted::default().then(fresh(b"new", "v2"));

        assert_eq!(block_on(cache.load("u", &source)).unwrap(), b"new");
        assert!(source.seen.borrow()[0].is_empty());
    }

    #[test]
    fn palette_comes_from_the_cover() {
        let (_, cache) = cache();
        let source = Scripted::default().then(fresh(&png([220, 20, 20]), "v1"));
        let palette = block_on(cache.palette("u", &source)).unwrap();
        assert!(palette.primary.r > 0.8);
    }

    #[test]
    fn file_source_revalidates_by_size_and_mtime() {
        let path = std::env::temp_dir().join(format!("pulse-visuals-{}-cover.png", std::process::id()));
        std::fs::write(&path, png([10, 10, 200])).unwrap();
        let url = format!("file://{}", path.display());
        let source = FileArtworkSource::new();

        let first = block_on(source.fetch(&url, &Validators::default())).unwrap();
        let ArtworkResponse::Fresh { bytes, validators } = first else {
            panic!("expected a fresh response");
        };
        assert_eq!(bytes, png([10, 10, 200]));
        assert!(validators.etag.is_some());

        let second = block_on(source.fetch(&url, &validators)).unwrap();
        assert_eq!(second, ArtworkResponse::NotModified);

        std::fs::remove_file(&path).unwrap();
        assert!(block_on(source.fetch(&url, &validators)).is_err());
    }

    #[test]
    fn relative_urls_resolve_against_the_root() {
        let source = FileArtworkSource::with_root("/covers");
        assert_eq!(source.resolve("a.png"), PathBuf::from("/covers/a.png"));
        assert_eq!(source.resolve("file:///tmp/b.png"), PathBuf::from("/tmp/b.png"));
    }
}
