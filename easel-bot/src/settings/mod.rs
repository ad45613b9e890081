//! Per-channel settings, created lazily and forgotten when idle.

mod channel;
mod store;

pub use channel::{ChannelSettings, CurrentRenderInfo, RenderGuard, RenderLock, RenderParams};
pub use store::{ExpiringStore, SweeperHandle};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Settings for every active channel.
///
/// Entries whose render is running are never evicted.
#[derive(Debug, Clone)]
pub struct ChannelSettingsStore {
    inner: ExpiringStore<String, Arc<ChannelSettings>>,
}

impl ChannelSettingsStore {
    /// Create a store forgetting channels idle for longer than `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: ExpiringStore::new(ttl).with_pin(|s: &Arc<ChannelSettings>| s.is_rendering()),
        }
    }

    /// Settings for `channel_id`, creating them with `factory` on a miss.
    ///
    /// The factory runs without holding the store lock. When two callers race
    /// on the same channel, both get the entry inserted first.
    ///
    /// # Errors
    ///
    /// Returns the factory's error. Nothing is inserted in that case.
    pub async fn get_or_create<F, Fut, E>(
        &self,
        channel_id: &str,
        factory: F,
    ) -> Result<Arc<ChannelSettings>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RenderParams, E>>,
    {
        let key = channel_id.to_string();
        if let Some(existing) = self.inner.get(&key).await {
            return Ok(existing);
        }

        let params = factory().await?;
        let created = Arc::new(ChannelSettings::new(channel_id, params));
        let settings = self
            .inner
            .get_or_insert_with(key, || Arc::clone(&created))
            .await;
        if Arc::ptr_eq(&settings, &created) {
            debug!(channel = channel_id, "created channel settings");
        }
        Ok(settings)
    }

    /// Settings for `channel_id`, refreshing their idle timer.
    pub async fn get(&self, channel_id: &str) -> Option<Arc<ChannelSettings>> {
        self.inner.get(&channel_id.to_string()).await
    }

    /// Settings for `channel_id` without touching the idle timer.
    pub async fn peek(&self, channel_id: &str) -> Option<Arc<ChannelSettings>> {
        self.inner.peek(&channel_id.to_string()).await
    }

    /// Restart `channel_id`'s idle timer. Returns whether the channel is held.
    pub async fn touch(&self, channel_id: &str) -> bool {
        self.inner.touch(&channel_id.to_string()).await
    }

    /// Insert settings directly.
    pub async fn insert(&self, settings: Arc<ChannelSettings>) {
        self.inner
            .insert(settings.channel_id().to_string(), settings)
            .await;
    }

    /// Number of channels held.
    pub async fn len(&self) -> usize {
        self.inner.len().await
    }

    /// Whether no channel is held.
    pub async fn is_empty(&self) -> bool {
        self.inner.is_empty().await
    }

    /// Evict idle channels now.
    pub async fn sweep(&self) -> usize {
        self.inner.sweep().await
    }

    /// Evict idle channels every `interval`.
    #[must_use]
    pub fn spawn_sweeper(&self, interval: Duration) -> SweeperHandle {
        self.inner.spawn_sweeper(interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderDefaults;
    use easel::image::ActiveModels;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn params() -> RenderParams {
        RenderParams::from_defaults(&RenderDefaults::default(), &ActiveModels::default())
    }

    #[tokio::test]
    async fn test_factory_runs_once_per_channel() {
        let store = ChannelSettingsStore::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            store
                .get_or_create("c1", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(params())
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_factory_error_inserts_nothing() {
        let store = ChannelSettingsStore::new(Duration::from_secs(60));
        let result = store
            .get_or_create("c1", || async { Err::<RenderParams, _>("engine down") })
            .await;
        assert_eq!(result.unwrap_err(), "engine down");
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_racing_creators_share_entry() {
        let store = ChannelSettingsStore::new(Duration::from_secs(60));
        let (a, b) = tokio::join!(
            store.get_or_create("c1", || async {
                tokio::task::yield_now().await;
                Ok::<_, Infallible>(params())
            }),
            store.get_or_create("c1", || async { Ok::<_, Infallible>(params()) }),
        );
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_channel_is_recreated_with_defaults() {
        let store = ChannelSettingsStore::new(Duration::from_secs(1200));
        let first = store
            .get_or_create("c1", || async { Ok::<_, Infallible>(params()) })
            .await
            .unwrap();
        first.update_params(|p| p.prompt = "dog".into());

        tokio::time::advance(Duration::from_secs(1201)).await;
        assert_eq!(store.sweep().await, 1);

        let second = store
            .get_or_create("c1", || async { Ok::<_, Infallible>(params()) })
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.params().prompt, "cat");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rendering_channel_is_not_evicted() {
        let store = ChannelSettingsStore::new(Duration::from_secs(10));
        let settings = store
            .get_or_create("c1", || async { Ok::<_, Infallible>(params()) })
            .await
            .unwrap();
        let guard = settings
            .try_begin_render(CurrentRenderInfo::new("u1", ""))
            .unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(store.sweep().await, 0);
        assert!(store.peek("c1").await.is_some());

        drop(guard);
        assert_eq!(store.sweep().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_restarts_idle_timer() {
        let store = ChannelSettingsStore::new(Duration::from_secs(10));
        assert!(!store.touch("c1").await);
        store
            .get_or_create("c1", || async { Ok::<_, Infallible>(params()) })
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(store.touch("c1").await);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(store.sweep().await, 0);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(store.sweep().await, 1);
    }
}
