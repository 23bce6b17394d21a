use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Something holding resources that must be released at extension unload.
pub trait Cleanup: Send + Sync {
    fn cleanup_name(&self) -> &str {
        "owner"
    }

    fn cleanup(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub cleaned: usize,
    pub failed: usize,
    /// The sweep had already run; nothing was done this time.
    pub already_shut_down: bool,
}

/// One-shot cleanup sweep over registered owners, invoked explicitly by the
/// host's unload hook.
#[derive(Default)]
pub struct ShutdownCoordinator {
    owners: Mutex<Vec<Arc<dyn Cleanup>>>,
    shut_down: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an owner to the sweep. Rejected once shutdown has run.
    pub fn register(&self, owner: Arc<dyn Cleanup>) -> bool {
        let mut owners = self.lock();
        if self.shut_down.load(Ordering::SeqCst) {
            tracing::warn!(owner = owner.cleanup_name(), "registration after shutdown ignored");
            return false;
        }
        owners.push(owner);
        true
    }

    pub fn registered(&self) -> usize {
        self.lock().len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Cleans up every owner once. Failures and panics are logged and do not
    /// stop the sweep.
    pub fn shutdown_all(&self) -> ShutdownReport {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            tracing::debug!("shutdown already performed");
            return ShutdownReport {
                already_shut_down: true,
                ..ShutdownReport::default()
            };
        }

        let owners = std::mem::take(&mut *self.lock());
        tracing::info!(owners = owners.len(), "running shutdown cleanup");
        let mut report = ShutdownReport::default();
        for owner in owners {
            let name = owner.cleanup_name().to_string();
            match panic::catch_unwind(AssertUnwindSafe(|| owner.cleanup())) {
                Ok(Ok(())) => report.cleaned += 1,
                Ok(Err(err)) => {
                    tracing::error!(?err, owner = %name, "cleanup failed");
                    report.failed += 1;
                }
                Err(_) => {
                    tracing::error!(owner = %name, "cleanup panicked");
                    report.failed += 1;
                }
            }
        }
        report
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn Cleanup>>> {
        self.owners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counting(AtomicUsize);

    impl Cleanup for Counting {
        fn cleanup(&self) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    impl Cleanup for Failing {
        fn cleanup_name(&self) -> &str {
            "failing"
        }

        fn cleanup(&self) -> anyhow::Result<()> {
            anyhow::bail!("resource busy")
        }
    }

    struct Panicking;

    impl Cleanup for Panicking {
        fn cleanup(&self) -> anyhow::Result<()> {
            panic!("cleanup exploded")
        }
    }

    #[test]
    fn every_owner_is_cleaned_despite_failures() {
        let coordinator = ShutdownCoordinator::new();
        let first = Arc::new(Counting(AtomicUsize::new(0)));
        let last = Arc::new(Counting(AtomicUsize::new(0)));
        coordinator.register(first.clone());
        coordinator.register(Arc::new(Failing));
        coordinator.register(Arc::new(Panicking));
        coordinator.register(last.clone());

        let report = coordinator.shutdown_all();
        assert_eq!(report.cleaned, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(first.0.load(Ordering::SeqCst), 1);
        assert_eq!(last.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn second_sweep_is_a_noop() {
        let coordinator = ShutdownCoordinator::new();
        let owner = Arc::new(Counting(AtomicUsize::new(0)));
        coordinator.register(owner.clone());

        assert_eq!(coordinator.shutdown_all().cleaned, 1);
        let again = coordinator.shutdown_all();
        assert!(again.already_shut_down);
        assert_eq!(again.cleaned, 0);
        assert_eq!(owner.0.load(Ordering::SeqCst), 1);
        assert!(!coordinator.register(owner));
    }
}
