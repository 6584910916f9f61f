//! The collaborator that actually produces a value on a cache miss.

use std::{fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{CacheError, Result},
    key::CacheKey,
    payload::{DecodedImage, TargetSize},
};

/// Produces the value for one key. Runs at most once per key while a load is
/// in flight, no matter how many callers asked for it.
#[async_trait]
pub trait Fetcher<V>: Send + Sync {
    async fn fetch(&self, ctx: FetchContext) -> Result<V>;
}

/// Progress sink handed to fetchers.
///
/// Values are clamped to `[0, 1]` and NaN is ignored. Subscribers only ever
/// see a non-decreasing sequence; lower values are dropped downstream.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn Fn(f32) + Send + Sync>,
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter").finish_non_exhaustive()
    }
}

impl ProgressReporter {
    pub fn new(sink: impl Fn(f32) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, progress: f32) {
        if progress.is_nan() {
            return;
        }
        (self.sink)(progress.clamp(0.0, 1.0));
    }
}

#[derive(Debug, Clone)]
pub struct FetchContext {
    key: CacheKey,
    progress: ProgressReporter,
    cancellation: CancellationToken,
}

impl FetchContext {
    pub fn new(
        key: CacheKey,
        progress: ProgressReporter,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            key,
            progress,
            cancellation,
        }
    }

    /// A context nobody listens to. Handy for driving a fetcher directly.
    pub fn detached(key: CacheKey) -> Self {
        Self::new(key, ProgressReporter::noop(), CancellationToken::new())
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn report_progress(&self, progress: f32) {
        self.progress.report(progress);
    }

    /// Cancelled once the last interested waiter detaches.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Same key and token, with progress mapped into `[0, ceiling]`.
    pub fn scaled(&self, ceiling: f32) -> Self {
        let outer = self.progress.clone();
        Self {
            key: self.key.clone(),
            progress: ProgressReporter::new(move |p| outer.report(p * ceiling)),
            cancellation: self.cancellation.clone(),
        }
    }
}

/// A [`Fetcher`] backed by an async closure. Built by [`fetcher_fn`].
pub struct FnFetcher<F> {
    f: F,
}

impl<F> fmt::Debug for FnFetcher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFetcher").finish_non_exhaustive()
    }
}

pub fn fetcher_fn<V, F, Fut>(f: F) -> FnFetcher<F>
where
    F: Fn(FetchContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<V>> + Send,
{
    FnFetcher { f }
}

#[async_trait]
impl<V, F, Fut> Fetcher<V> for FnFetcher<F>
where
    V: Send + 'static,
    F: Fn(FetchContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<V>> + Send,
{
    async fn fetch(&self, ctx: FetchContext) -> Result<V> {
        (self.f)(ctx).await
    }
}

/// Turns a fetcher of encoded bytes into a fetcher of decoded pixels.
///
/// The source owns the first 90% of the progress range. Decoding and
/// scaling run on the blocking pool.
#[derive(Debug)]
pub struct DecodeImage<F> {
    source: F,
    target: Option<TargetSize>,
}

impl<F> DecodeImage<F> {
    pub fn new(source: F, target: Option<TargetSize>) -> Self {
        Self { source, target }
    }
}

const SOURCE_PROGRESS_SHARE: f32 = 0.9;

#[async_trait]
impl<F> Fetcher<DecodedImage> for DecodeImage<F>
where
    F: Fetcher<Vec<u8>>,
{
    async fn fetch(&self, ctx: FetchContext) -> Result<DecodedImage> {
        let encoded = self.source.fetch(ctx.scaled(SOURCE_PROGRESS_SHARE)).await?;
        if ctx.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        let target = self.target;
        let image = tokio::task::spawn_blocking(move || {
            DecodedImage::decode(&encoded, target)
        })
        .await
        .map_err(CacheError::fetch_failed)?
        .map_err(CacheError::fetch_failed)?;

        ctx.report_progress(1.0);
        Ok(image)
    }
}
