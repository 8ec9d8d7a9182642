use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic id source for subscriptions
static SUBSCRIPTION_COUNTER: AtomicU64 = AtomicU64::new(1);

type Disposer = Box<dyn FnOnce() + Send + Sync>;

/// A live listener on a remote path.
///
/// `dispose` stops delivery. Dropping an undisposed subscription disposes
/// it too, so a handle can never outlive its owner.
pub struct Subscription {
    id: u64,
    path: String,
    disposer: Option<Disposer>,
}

impl Subscription {
    pub fn new(path: impl Into<String>, disposer: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id: SUBSCRIPTION_COUNTER.fetch_add(1, Ordering::Relaxed),
            path: path.into(),
            disposer: Some(Box::new(disposer)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn dispose(mut self) {
        self.run_disposer();
    }

    fn run_disposer(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_disposer();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("active", &self.disposer.is_some())
            .finish()
    }
}
