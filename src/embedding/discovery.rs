//! One-shot dimension discovery.
//!
//! A freshly configured namespace has `dim == 0`. The first successful embed
//! reveals the real width; [`DimensionDiscovery`] reports it exactly once to a
//! caller-supplied callback, which typically persists it into configuration
//! (see [`MemoryConfig::record_dimension`](crate::config::MemoryConfig::record_dimension)).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use super::EmbeddingProvider;

type DimensionCallback = Box<dyn FnOnce(usize) -> Result<()> + Send>;

/// Wraps an [`EmbeddingProvider`] and fires a callback the first time the
/// output dimension becomes known.
pub struct DimensionDiscovery<P> {
    inner: P,
    dim: AtomicUsize,
    on_discovered: Mutex<Option<DimensionCallback>>,
}

impl<P: EmbeddingProvider> DimensionDiscovery<P> {
    /// `known_dim` is the persisted dimension (0 if unknown). When it is
    /// already non-zero the callback is dropped without ever being called.
    pub fn new(
        inner: P,
        known_dim: usize,
        on_discovered: impl FnOnce(usize) -> Result<()> + Send + 'static,
    ) -> Self {
        let callback: Option<DimensionCallback> = if known_dim == 0 {
            Some(Box::new(on_discovered))
        } else {
            None
        };
        Self {
            inner,
            dim: AtomicUsize::new(known_dim),
            on_discovered: Mutex::new(callback),
        }
    }

    pub fn into_inner(self) -> P {
        self.inner
    }

    fn observe(&self, len: usize) {
        if len == 0 {
            return;
        }
        // Only the caller that wins the 0 -> len transition runs the callback.
        if self
            .dim
            .compare_exchange(0, len, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        tracing::info!(dim = len, "embedding dimension discovered");

        let callback = match self.on_discovered.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(callback) = callback {
            if let Err(e) = callback(len) {
                tracing::warn!(dim = len, error = %e, "failed to record embedding dimension");
            }
        }
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for DimensionDiscovery<P> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self.inner.embed(text).await?;
        if self.dim.load(Ordering::Acquire) == 0 {
            self.observe(vector.len());
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dim.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    struct FixedProvider {
        width: usize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("provider unavailable");
            }
            Ok(vec![0.5; self.width])
        }

        fn dimensions(&self) -> usize {
            0
        }
    }

    fn provider(width: usize) -> FixedProvider {
        FixedProvider {
            width,
            fail: AtomicBool::new(false),
        }
    }

    #[tokio::test]
    async fn callback_fires_once_with_discovered_width() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        let embedder = DimensionDiscovery::new(provider(3), 0, move |dim| {
            seen.lock().unwrap().push(dim);
            Ok(())
        });

        assert_eq!(embedder.dimensions(), 0);
        embedder.embed("first").await.unwrap();
        embedder.embed("second").await.unwrap();
        embedder.embed("third").await.unwrap();

        assert_eq!(embedder.dimensions(), 3);
        assert_eq!(*calls.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn known_dimension_never_calls_back() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let embedder = DimensionDiscovery::new(provider(3), 3, move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        embedder.embed("text").await.unwrap();
        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(embedder.dimensions(), 3);
    }

    #[tokio::test]
    async fn failed_embed_does_not_discover() {
        let inner = provider(4);
        inner.fail.store(true, Ordering::SeqCst);
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let embedder = DimensionDiscovery::new(inner, 0, move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        assert!(embedder.embed("text").await.is_err());
        assert_eq!(embedder.dimensions(), 0);
        assert!(!called.load(Ordering::SeqCst));

        let inner = embedder.into_inner();
        inner.fail.store(false, Ordering::SeqCst);
        let embedder = DimensionDiscovery::new(inner, 0, |_| Ok(()));
        embedder.embed("text").await.unwrap();
        assert_eq!(embedder.dimensions(), 4);
    }

    #[tokio::test]
    async fn callback_error_is_not_propagated() {
        let embedder = DimensionDiscovery::new(provider(2), 0, |_| anyhow::bail!("disk full"));
        let vector = embedder.embed("text").await.unwrap();
        assert_eq!(vector.len(), 2);
        assert_eq!(embedder.dimensions(), 2);
    }

    #[tokio::test]
    async fn concurrent_first_calls_report_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let embedder = Arc::new(DimensionDiscovery::new(provider(5), 0, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let mut handles = Vec::new();
        for i in 0..8 {
            let embedder = Arc::clone(&embedder);
            handles.push(tokio::spawn(async move {
                embedder.embed(&format!("text {i}")).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
