use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::ImageFormat;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};

use crate::api::AssetApi;
use crate::config::ClientConfig;
use crate::error::ClientError;

/// What to do after a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    /// Give up quietly: the asset exists but is not written yet.
    StillProcessing,
    Fail,
}

/// Bounded retry for assets that 404 while the producer catches up.
/// An asset that never appears is fetched `1 + max_retries` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.asset_retry.max_retries,
            delay: config.asset_retry_delay(),
        }
    }

    pub fn decide(&self, retries_so_far: u32, error: &ClientError) -> RetryDecision {
        if !error.is_not_found() {
            return RetryDecision::Fail;
        }
        if retries_so_far < self.max_retries {
            RetryDecision::RetryAfter(self.delay)
        } else {
            RetryDecision::StillProcessing
        }
    }
}

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("Image is still processing. Please refresh the page in a moment.")]
    StillProcessing,

    #[error("Failed to load image: {0}")]
    Failed(#[from] ClientError),

    #[error("No image loaded")]
    NothingLoaded,

    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ViewerError> for String {
    fn from(err: ViewerError) -> String {
        err.to_string()
    }
}

/// Progress notifications while an image loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerStatus {
    Loading { image_id: i64 },
    Retrying { attempt: u32, max: u32 },
    Ready { image_id: i64, has_original: bool },
    Failed { message: String },
}

/// Fetched image bytes held in a scratch file. The file is removed when the
/// handle drops.
#[derive(Debug)]
pub struct AssetHandle {
    file: NamedTempFile,
    len: usize,
    format: Option<ImageFormat>,
}

impl AssetHandle {
    pub fn from_bytes(bytes: &[u8]) -> std::io::Result<Self> {
        let mut file = tempfile::Builder::new().prefix("gradportrait-").tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(Self {
            file,
            len: bytes.len(),
            format: image::guess_format(bytes).ok(),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn format(&self) -> Option<ImageFormat> {
        self.format
    }

    pub fn extension(&self) -> &'static str {
        self.format
            .and_then(|f| f.extensions_str().first().copied())
            .unwrap_or("png")
    }
}

type StatusObserver = Box<dyn Fn(ViewerStatus) + Send + Sync>;

/// Side-by-side view of one generated image and the photo it came from.
pub struct ComparisonViewer<A: ?Sized> {
    api: Arc<A>,
    policy: RetryPolicy,
    observer: Option<StatusObserver>,
    image_id: Option<i64>,
    result: Option<AssetHandle>,
    original: Option<AssetHandle>,
}

impl<A: AssetApi + ?Sized> ComparisonViewer<A> {
    pub fn new(api: Arc<A>, policy: RetryPolicy) -> Self {
        Self {
            api,
            policy,
            observer: None,
            image_id: None,
            result: None,
            original: None,
        }
    }

    pub fn with_observer(mut self, observer: impl Fn(ViewerStatus) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn image_id(&self) -> Option<i64> {
        self.image_id
    }

    pub fn result(&self) -> Option<&AssetHandle> {
        self.result.as_ref()
    }

    pub fn original(&self) -> Option<&AssetHandle> {
        self.original.as_ref()
    }

    /// Load `image_id`, replacing whatever was shown before. Only the result
    /// is required; a missing original just leaves that side empty.
    pub async fn show(&mut self, image_id: i64, with_original: bool) -> Result<(), ViewerError> {
        self.clear();
        self.notify(ViewerStatus::Loading { image_id });

        let result = match self.fetch_result_with_retry(image_id).await {
            Ok(handle) => handle,
            Err(e) => {
                self.notify(ViewerStatus::Failed {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };
        info!(
            "Loaded result for image {} ({} bytes, {:?})",
            image_id,
            result.len(),
            result.format()
        );

        let original = if with_original {
            self.fetch_original(image_id).await
        } else {
            None
        };

        self.notify(ViewerStatus::Ready {
            image_id,
            has_original: original.is_some(),
        });
        self.image_id = Some(image_id);
        self.result = Some(result);
        self.original = original;
        Ok(())
    }

    /// Release both scratch files.
    pub fn clear(&mut self) {
        self.image_id = None;
        self.result = None;
        self.original = None;
    }

    /// Copy the loaded result into `dir` as `gradgen_<id>.<ext>`.
    pub fn save_result(&self, dir: &Path) -> Result<PathBuf, ViewerError> {
        let (Some(image_id), Some(handle)) = (self.image_id, self.result.as_ref()) else {
            return Err(ViewerError::NothingLoaded);
        };
        std::fs::create_dir_all(dir)?;
        let target = dir.join(format!("gradgen_{}.{}", image_id, handle.extension()));

        let mut temp = NamedTempFile::new_in(dir)?;
        let mut source = handle.file.reopen()?;
        std::io::copy(&mut source, &mut temp)?;
        temp.flush()?;
        temp.persist(&target).map_err(|e| ViewerError::Io(e.error))?;

        info!("Saved image {} to {:?}", image_id, target);
        Ok(target)
    }

    async fn fetch_result_with_retry(&self, image_id: i64) -> Result<AssetHandle, ViewerError> {
        let mut retries = 0;
        loop {
            let error = match self.api.fetch_result(image_id).await {
                Ok(bytes) => return Ok(AssetHandle::from_bytes(&bytes)?),
                Err(e) => e,
            };
            match self.policy.decide(retries, &error) {
                RetryDecision::RetryAfter(delay) => {
                    retries += 1;
                    warn!(
                        "Image {} not ready, retrying ({}/{})",
                        image_id, retries, self.policy.max_retries
                    );
                    self.notify(ViewerStatus::Retrying {
                        attempt: retries,
                        max: self.policy.max_retries,
                    });
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::StillProcessing => {
                    warn!("Image {} still missing after {} retries", image_id, retries);
                    return Err(ViewerError::StillProcessing);
                }
                RetryDecision::Fail => return Err(ViewerError::Failed(error)),
            }
        }
    }

    async fn fetch_original(&self, image_id: i64) -> Option<AssetHandle> {
        match self.api.fetch_input(image_id).await {
            Ok(bytes) => match AssetHandle::from_bytes(&bytes) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("Failed to store original for image {}: {}", image_id, e);
                    None
                }
            },
            Err(e) => {
                warn!("Original for image {} unavailable: {}", image_id, e);
                None
            }
        }
    }

    fn notify(&self, status: ViewerStatus) {
        if let Some(observer) = &self.observer {
            observer(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockAssetApi;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10];

    fn not_found() -> ClientError {
        ClientError::NotFound {
            detail: "Image file not found".into(),
        }
    }

    fn viewer(api: MockAssetApi) -> ComparisonViewer<MockAssetApi> {
        ComparisonViewer::new(Arc::new(api), RetryPolicy::default())
    }

    #[test]
    fn test_policy_decisions() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(0, &not_found()),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
        assert_eq!(
            policy.decide(4, &not_found()),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
        assert_eq!(policy.decide(5, &not_found()), RetryDecision::StillProcessing);
        assert_eq!(policy.decide(0, &ClientError::Timeout), RetryDecision::Fail);
        assert_eq!(
            policy.decide(
                0,
                &ClientError::Server {
                    status: 500,
                    detail: "boom".into()
                }
            ),
            RetryDecision::Fail
        );
    }

    #[test]
    fn test_handle_sniffs_format_and_cleans_up() {
        let handle = AssetHandle::from_bytes(PNG).unwrap();
        let path = handle.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(handle.format(), Some(ImageFormat::Png));
        assert_eq!(handle.extension(), "png");
        drop(handle);
        assert!(!path.exists());

        let handle = AssetHandle::from_bytes(JPEG).unwrap();
        assert_eq!(handle.format(), Some(ImageFormat::Jpeg));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_missing_gives_still_processing() {
        let mut api = MockAssetApi::new();
        api.expect_fetch_result()
            .times(6)
            .returning(|_| Err(not_found()));
        api.expect_fetch_input().times(0);

        let statuses = Arc::new(Mutex::new(Vec::new()));
        let seen = statuses.clone();
        let mut viewer = viewer(api).with_observer(move |s| seen.lock().unwrap().push(s));

        let start = tokio::time::Instant::now();
        let err = viewer.show(42, true).await.unwrap_err();
        assert!(matches!(err, ViewerError::StillProcessing));
        assert_eq!(
            err.to_string(),
            "Image is still processing. Please refresh the page in a moment."
        );
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(10) && waited < Duration::from_secs(11));
        assert!(viewer.result().is_none());

        let retries: Vec<_> = statuses
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                ViewerStatus::Retrying { attempt, max } => Some((*attempt, *max)),
                _ => None,
            })
            .collect();
        assert_eq!(retries, vec![(1, 5), (2, 5), (3, 5), (4, 5), (5, 5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_third_retry_stops_retrying() {
        let mut api = MockAssetApi::new();
        let mut seq = mockall::Sequence::new();
        api.expect_fetch_result()
            .times(3)
            .in_sequence(&mut seq)
            .returning(|_| Err(not_found()));
        api.expect_fetch_result()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(PNG.to_vec()));
        api.expect_fetch_input()
            .times(1)
            .returning(|_| Ok(JPEG.to_vec()));

        let mut viewer = viewer(api);
        viewer.show(7, true).await.unwrap();
        assert_eq!(viewer.image_id(), Some(7));
        assert_eq!(viewer.result().unwrap().format(), Some(ImageFormat::Png));
        assert_eq!(viewer.original().unwrap().format(), Some(ImageFormat::Jpeg));
    }

    #[tokio::test]
    async fn test_server_error_fails_without_retry() {
        let mut api = MockAssetApi::new();
        api.expect_fetch_result().times(1).returning(|_| {
            Err(ClientError::Server {
                status: 500,
                detail: "Internal Server Error".into(),
            })
        });

        let mut viewer = viewer(api);
        let err = viewer.show(3, false).await.unwrap_err();
        assert!(matches!(err, ViewerError::Failed(ClientError::Server { .. })));
    }

    #[tokio::test]
    async fn test_missing_original_is_omitted() {
        let mut api = MockAssetApi::new();
        api.expect_fetch_result()
            .times(1)
            .returning(|_| Ok(PNG.to_vec()));
        api.expect_fetch_input()
            .times(1)
            .returning(|_| Err(not_found()));

        let mut viewer = viewer(api);
        viewer.show(5, true).await.unwrap();
        assert!(viewer.result().is_some());
        assert!(viewer.original().is_none());
    }

    #[tokio::test]
    async fn test_reshow_and_clear_release_files() {
        let mut api = MockAssetApi::new();
        api.expect_fetch_result()
            .times(2)
            .returning(|_| Ok(PNG.to_vec()));
        api.expect_fetch_input()
            .times(2)
            .returning(|_| Ok(JPEG.to_vec()));

        let mut viewer = viewer(api);
        viewer.show(1, true).await.unwrap();
        let first_result = viewer.result().unwrap().path().to_path_buf();
        let first_original = viewer.original().unwrap().path().to_path_buf();

        viewer.show(2, true).await.unwrap();
        assert!(!first_result.exists());
        assert!(!first_original.exists());

        let second = viewer.result().unwrap().path().to_path_buf();
        viewer.clear();
        assert!(!second.exists());
        assert!(viewer.image_id().is_none());
    }

    #[tokio::test]
    async fn test_save_result_writes_download_name() {
        let mut api = MockAssetApi::new();
        api.expect_fetch_result()
            .times(1)
            .returning(|_| Ok(PNG.to_vec()));

        let mut viewer = viewer(api);
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            viewer.save_result(dir.path()),
            Err(ViewerError::NothingLoaded)
        ));

        viewer.show(11, false).await.unwrap();
        let saved = viewer.save_result(dir.path()).unwrap();
        assert_eq!(saved, dir.path().join("gradgen_11.png"));
        assert_eq!(std::fs::read(&saved).unwrap(), PNG);
    }
}
