//! Disposable handle returned by every subscribe call in the identity layer.

/// Releases its registration when dropped or when `unsubscribe` is called.
/// Hold it for exactly as long as the consumer that registered it lives.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self { release: Some(Box::new(release)) }
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    pub fn is_active(&self) -> bool { self.release.is_some() }

    fn release_now(&mut self) {
        if let Some(f) = self.release.take() { f(); }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("active", &self.is_active()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn releases_once_on_drop() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        {
            let _sub = Subscription::new(move || { h.fetch_add(1, Ordering::SeqCst); });
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn explicit_unsubscribe_does_not_release_twice() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let sub = Subscription::new(move || { h.fetch_add(1, Ordering::SeqCst); });
        assert!(sub.is_active());
        sub.unsubscribe();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
