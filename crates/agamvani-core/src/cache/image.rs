//! Artwork cache keyed by track code.
//!
//! Images are cached per logical track rather than per URL, because the same
//! track shows up under differently formed but equivalent URLs across the
//! schedule and the now-playing card. Concurrent requests for one code share
//! a single download, and cached buffers are released explicitly through
//! [`ImageCache::cleanup`] and [`ImageCache::clear`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::api::{FetchError, FetchedImage, ImageSource};

type SharedFetch = Shared<BoxFuture<'static, Result<ImageHandle, FetchError>>>;

struct ImageBlob {
    track_code: String,
    content_type: Option<String>,
    size: usize,
    bytes: Mutex<Option<Bytes>>,
}

/// Handle to a downloaded image.
///
/// Clones share one buffer. [`ImageHandle::release`] frees that buffer for
/// every clone at once; afterwards [`ImageHandle::bytes`] returns `None`.
#[derive(Clone)]
pub struct ImageHandle {
    inner: Arc<ImageBlob>,
}

impl ImageHandle {
    fn new(track_code: &str, image: FetchedImage) -> Self {
        Self {
            inner: Arc::new(ImageBlob {
                track_code: track_code.to_string(),
                content_type: image.content_type,
                size: image.bytes.len(),
                bytes: Mutex::new(Some(image.bytes)),
            }),
        }
    }

    pub fn track_code(&self) -> &str {
        &self.inner.track_code
    }

    pub fn content_type(&self) -> Option<&str> {
        self.inner.content_type.as_deref()
    }

    /// Size of the downloaded body, still reported after release.
    pub fn len(&self) -> usize {
        self.inner.size
    }

    pub fn is_empty(&self) -> bool {
        self.inner.size == 0
    }

    /// The image body, or `None` once released.
    pub fn bytes(&self) -> Option<Bytes> {
        self.inner.bytes.lock().clone()
    }

    pub fn is_released(&self) -> bool {
        self.inner.bytes.lock().is_none()
    }

    /// Drop the underlying buffer. Idempotent.
    pub fn release(&self) {
        self.inner.bytes.lock().take();
    }

    /// Whether both handles point at the same download.
    pub fn ptr_eq(&self, other: &ImageHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageHandle")
            .field("track_code", &self.inner.track_code)
            .field("content_type", &self.inner.content_type)
            .field("size", &self.inner.size)
            .field("released", &self.is_released())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCacheStats {
    pub cached_images: usize,
    pub loading_images: usize,
    pub cached_bytes: usize,
    pub cached_codes: Vec<String>,
}

#[derive(Default)]
struct ImageState {
    blobs: HashMap<String, ImageHandle>,
    loading: HashMap<String, SharedFetch>,
    /// Bumped by `clear`; downloads started under an older generation are
    /// discarded when they land.
    generation: u64,
}

pub struct ImageCache {
    source: Arc<dyn ImageSource>,
    state: Arc<Mutex<ImageState>>,
}

impl ImageCache {
    pub fn new(source: Arc<dyn ImageSource>) -> Self {
        Self {
            source,
            state: Arc::new(Mutex::new(ImageState::default())),
        }
    }

    /// Return the image for `track_code`, downloading `url` if needed.
    ///
    /// A cached handle is returned without I/O. If a download for the code
    /// is already running, this waits on that download instead of starting
    /// another. A failed download clears its in-flight marker, so the next
    /// call retries.
    pub async fn fetch_image(&self, url: &str, track_code: &str) -> Result<ImageHandle, FetchError> {
        let fetch = {
            let mut state = self.state.lock();
            if let Some(handle) = state.blobs.get(track_code) {
                return Ok(handle.clone());
            }
            match state.loading.get(track_code) {
                Some(pending) => {
                    debug!(track_code, "Joining in-flight image fetch");
                    pending.clone()
                }
                None => self.start_fetch(&mut state, url, track_code),
            }
        };
        fetch.await
    }

    /// Spawn the download so it completes (and cleans up its marker) even if
    /// every caller stops waiting on it. Must run inside a Tokio runtime.
    fn start_fetch(&self, state: &mut ImageState, url: &str, track_code: &str) -> SharedFetch {
        let generation = state.generation;
        let source = Arc::clone(&self.source);
        let shared_state = Arc::clone(&self.state);
        let url = url.to_string();
        let code = track_code.to_string();

        debug!(track_code = %code, url = %url, "Starting image fetch");

        let task = tokio::spawn({
            let code = code.clone();
            async move {
                let result = source
                    .fetch_image(&url)
                    .await
                    .map(|image| ImageHandle::new(&code, image));

                let mut state = shared_state.lock();
                if state.generation != generation {
                    // Superseded by clear(): waiters get an error, never a released handle
                    if let Ok(handle) = &result {
                        debug!(track_code = %code, "Discarding image fetched before cache was cleared");
                        handle.release();
                    }
                    return Err(FetchError::Cancelled);
                }

                state.loading.remove(&code);
                match &result {
                    Ok(handle) => {
                        state.blobs.insert(code.clone(), handle.clone());
                    }
                    Err(e) => debug!(track_code = %code, error = %e, "Image fetch failed"),
                }
                result
            }
        });

        let cleanup_state = Arc::clone(&self.state);
        let fetch = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(track_code = %code, error = %e, "Image fetch task did not complete");
                    let mut state = cleanup_state.lock();
                    if state.generation == generation {
                        state.loading.remove(&code);
                    }
                    Err(FetchError::Cancelled)
                }
            }
        }
        .boxed()
        .shared();

        state.loading.insert(track_code.to_string(), fetch.clone());
        fetch
    }

    /// Cached handle for `track_code`, if any. Never blocks.
    pub fn get_cached_or_placeholder(&self, track_code: &str) -> Option<ImageHandle> {
        self.state.lock().blobs.get(track_code).cloned()
    }

    pub fn has(&self, track_code: &str) -> bool {
        self.state.lock().blobs.contains_key(track_code)
    }

    pub fn is_loading(&self, track_code: &str) -> bool {
        self.state.lock().loading.contains_key(track_code)
    }

    /// Start a background download for an upcoming track. Errors are
    /// swallowed. Does nothing when the image is already cached or loading,
    /// or when called outside a Tokio runtime.
    pub fn preload_next(&self, track_code: &str, url: &str) {
        if tokio::runtime::Handle::try_current().is_err() {
            warn!(track_code, "Image preload requested outside a Tokio runtime");
            return;
        }

        let mut state = self.state.lock();
        if state.blobs.contains_key(track_code) || state.loading.contains_key(track_code) {
            return;
        }
        // The spawned task runs to completion on its own; nobody awaits it.
        drop(self.start_fetch(&mut state, url, track_code));
    }

    /// Release every cached image whose code is not in `keep_codes`.
    /// Returns the number of released images.
    pub fn cleanup<S: AsRef<str>>(&self, keep_codes: &[S]) -> usize {
        let keep: HashSet<&str> = keep_codes.iter().map(AsRef::as_ref).collect();
        let mut state = self.state.lock();
        let before = state.blobs.len();
        state.blobs.retain(|code, handle| {
            let kept = keep.contains(code.as_str());
            if !kept {
                handle.release();
            }
            kept
        });
        let released = before - state.blobs.len();
        if released > 0 {
            debug!(released, kept = state.blobs.len(), "Released cached images");
        }
        released
    }

    /// Release all images and forget in-flight downloads.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        for handle in state.blobs.values() {
            handle.release();
        }
        state.blobs.clear();
        state.loading.clear();
        state.generation += 1;
    }

    pub fn stats(&self) -> ImageCacheStats {
        let state = self.state.lock();
        let mut cached_codes: Vec<String> = state.blobs.keys().cloned().collect();
        cached_codes.sort();
        ImageCacheStats {
            cached_images: state.blobs.len(),
            loading_images: state.loading.len(),
            cached_bytes: state.blobs.values().map(ImageHandle::len).sum(),
            cached_codes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Serves a fixed body after a delay, failing the first `failures` calls.
    struct MockImages {
        calls: AtomicUsize,
        failures: usize,
        delay: Duration,
    }

    impl MockImages {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                failures,
                delay: Duration::from_millis(100),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ImageSource for MockImages {
        async fn fetch_image(&self, url: &str) -> Result<FetchedImage, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if call < self.failures {
                return Err(FetchError::NotFound(url.to_string()));
            }
            Ok(FetchedImage {
                bytes: Bytes::from(format!("image:{url}")),
                content_type: Some("image/jpeg".to_string()),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_fetches_share_one_request() {
        let source = MockImages::new(0);
        let cache = ImageCache::new(source.clone());

        let (a, b) = tokio::join!(
            cache.fetch_image("/t/a.jpg", "trackA"),
            cache.fetch_image("/t/a.jpg", "trackA"),
        );
        let a = a.expect("first fetch");
        let b = b.expect("second fetch");

        assert_eq!(source.calls(), 1);
        assert!(a.ptr_eq(&b));
        assert_eq!(a.bytes().as_deref(), Some(&b"image:/t/a.jpg"[..]));
        assert_eq!(a.content_type(), Some("image/jpeg"));
        assert!(!cache.is_loading("trackA"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_image_skips_network() {
        let source = MockImages::new(0);
        let cache = ImageCache::new(source.clone());

        let first = cache.fetch_image("/t/a.jpg", "trackA").await.expect("fetch");
        // A different but equivalent URL for the same track still hits the cache
        let second = cache
            .fetch_image("http://localhost:8002/t/a.jpg", "trackA")
            .await
            .expect("cached fetch");

        assert_eq!(source.calls(), 1);
        assert!(first.ptr_eq(&second));
        assert!(cache.has("trackA"));
        assert!(cache.get_cached_or_placeholder("trackA").is_some());
        assert!(cache.get_cached_or_placeholder("trackB").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_can_be_retried() {
        let source = MockImages::new(1);
        let cache = ImageCache::new(source.clone());

        let err = cache.fetch_image("/t/a.jpg", "trackA").await.unwrap_err();
        assert_eq!(err, FetchError::NotFound("/t/a.jpg".to_string()));
        assert!(!cache.is_loading("trackA"));
        assert!(!cache.has("trackA"));

        cache.fetch_image("/t/a.jpg", "trackA").await.expect("retry succeeds");
        assert_eq!(source.calls(), 2);
        assert!(cache.has("trackA"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_all_see_failure() {
        let source = MockImages::new(1);
        let cache = ImageCache::new(source.clone());

        let (a, b) = tokio::join!(
            cache.fetch_image("/t/a.jpg", "trackA"),
            cache.fetch_image("/t/a.jpg", "trackA"),
        );
        assert!(a.is_err());
        assert!(b.is_err());
        assert_eq!(source.calls(), 1);
        assert!(!cache.is_loading("trackA"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_preload_runs_in_background_and_swallows_errors() {
        let source = MockImages::new(1);
        let cache = ImageCache::new(source.clone());

        cache.preload_next("trackA", "/t/a.jpg");
        assert!(cache.is_loading("trackA"));
        // Already loading: no second request
        cache.preload_next("trackA", "/t/a.jpg");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(source.calls(), 1);
        assert!(!cache.is_loading("trackA"));
        assert!(!cache.has("trackA"));

        cache.preload_next("trackA", "/t/a.jpg");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(source.calls(), 2);
        assert!(cache.has("trackA"));

        // Cached: preload is a no-op
        cache.preload_next("trackA", "/t/a.jpg");
        assert!(!cache.is_loading("trackA"));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_releases_unkept_images() {
        let source = MockImages::new(0);
        let cache = ImageCache::new(source.clone());

        let a = cache.fetch_image("/t/a.jpg", "A").await.expect("fetch A");
        let b = cache.fetch_image("/t/b.jpg", "B").await.expect("fetch B");
        let c = cache.fetch_image("/t/c.jpg", "C").await.expect("fetch C");

        assert_eq!(cache.cleanup(&["B"]), 2);
        assert!(a.is_released());
        assert!(!b.is_released());
        assert!(c.is_released());
        assert_eq!(a.bytes(), None);

        let stats = cache.stats();
        assert_eq!(stats.cached_images, 1);
        assert_eq!(stats.cached_codes, vec!["B".to_string()]);
        assert_eq!(stats.cached_bytes, b.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_releases_everything_and_drops_late_results() {
        let source = MockImages::new(0);
        let cache = ImageCache::new(source.clone());

        let a = cache.fetch_image("/t/a.jpg", "A").await.expect("fetch A");
        cache.preload_next("B", "/t/b.jpg");
        assert!(cache.is_loading("B"));

        cache.clear();
        assert!(a.is_released());
        assert!(!cache.is_loading("B"));

        // A caller waiting across the clear gets an error, not a released handle
        let (waited, ()) = tokio::join!(cache.fetch_image("/t/c.jpg", "C"), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cache.clear();
        });
        assert_eq!(waited.unwrap_err(), FetchError::Cancelled);
        assert!(!cache.has("C"));

        // The in-flight downloads land after the clear and are discarded
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(source.calls(), 3);
        let stats = cache.stats();
        assert_eq!(stats.cached_images, 0);
        assert_eq!(stats.loading_images, 0);

        // A fresh fetch after clear works normally
        cache.fetch_image("/t/b.jpg", "B").await.expect("fetch B");
        assert!(cache.has("B"));
        assert_eq!(source.calls(), 4);
    }
}
