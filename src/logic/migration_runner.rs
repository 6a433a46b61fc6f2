use anyhow::{anyhow, Context, Result};
use futures::FutureExt;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::model::{Migration, MigrationStatusRecord, LOCK_ID};
use crate::store::MigrationStatusStore;

/// How often a contended runner rechecks the lock sentinel
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Resolves migration identifiers from the configured order to runnable migrations
pub trait MigrationLoader: Send + Sync {
    fn load(&self, name: &str) -> Result<Arc<dyn Migration>>;
}

/// Loader backed by migrations registered in-process
#[derive(Default)]
pub struct MigrationRegistry {
    migrations: HashMap<String, Arc<dyn Migration>>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, migration: Arc<dyn Migration>) -> Self {
        self.register(name, migration);
        self
    }

    pub fn register(&mut self, name: impl Into<String>, migration: Arc<dyn Migration>) {
        self.migrations.insert(name.into(), migration);
    }
}

impl MigrationLoader for MigrationRegistry {
    fn load(&self, name: &str) -> Result<Arc<dyn Migration>> {
        self.migrations
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown migration: {}", name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    Skipped,
    AlreadyApplied,
    Applied,
    /// Ran, but the status record was removed so it runs again
    NotCommitted,
    /// Failed and rolled back its status record
    Failed(String),
}

/// What one `run` did. Informational only: `run` never fails.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunReport {
    /// Whether this invocation held the lock
    pub acquired: bool,
    pub results: Vec<(String, MigrationOutcome)>,
    /// Store failure that cut the run short
    pub error: Option<String>,
}

impl RunReport {
    pub fn outcome(&self, name: &str) -> Option<&MigrationOutcome> {
        self.results
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, outcome)| outcome)
    }
}

/// Applies the configured migrations exactly once across every process sharing the store
pub struct MigrationRunner {
    store: Arc<dyn MigrationStatusStore>,
    loader: Arc<dyn MigrationLoader>,
    order: Vec<String>,
    poll_interval: Duration,
    waiting: Arc<AtomicBool>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl MigrationRunner {
    pub fn new(
        store: Arc<dyn MigrationStatusStore>,
        loader: Arc<dyn MigrationLoader>,
        order: Vec<String>,
    ) -> Self {
        Self {
            store,
            loader,
            order,
            poll_interval: LOCK_POLL_INTERVAL,
            waiting: Arc::new(AtomicBool::new(false)),
            poller: Mutex::new(None),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Acquire the lock, run every pending migration in order, release the lock.
    /// When another process holds the lock, start waiting for it and return at once.
    pub async fn run(&self) -> RunReport {
        let token = Uuid::new_v4().to_string();
        let mut report = RunReport::default();

        let mut guard = match self.acquire(&token).await {
            Ok(Some(guard)) => guard,
            Ok(None) => return report,
            Err(e) => {
                error!("Migration run aborted: {:#}", e);
                report.error = Some(format!("{:#}", e));
                return report;
            }
        };
        report.acquired = true;
        info!("Acquired migration lock; {} migrations configured", self.order.len());

        let body = AssertUnwindSafe(self.apply_all(&mut guard, &mut report))
            .catch_unwind()
            .await;
        match body {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Migration run aborted: {:#}", e);
                report.error = Some(format!("{:#}", e));
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!("Migration run panicked: {}", reason);
                report.error = Some(format!("panicked: {}", reason));
            }
        }

        guard.release().await;
        report
    }

    /// The guard when this invocation took the lock, `None` when another process holds it
    async fn acquire(&self, token: &str) -> Result<Option<LockGuard>> {
        let lock = self
            .store
            .upsert_on_insert(MigrationStatusRecord::lock(token))
            .await
            .context("Failed to acquire migration lock")?;

        if lock.uuid.as_deref() != Some(token) {
            info!(
                "Migration lock is held by {}; waiting for it to be released",
                lock.uuid.as_deref().unwrap_or("unknown holder")
            );
            self.start_waiting();
            return Ok(None);
        }

        Ok(Some(LockGuard {
            store: self.store.clone(),
            held: true,
            in_flight: None,
        }))
    }

    async fn apply_all(&self, guard: &mut LockGuard, report: &mut RunReport) -> Result<()> {
        for name in &self.order {
            let outcome = self.apply(name, guard).await?;
            report.results.push((name.clone(), outcome));
        }
        Ok(())
    }

    async fn apply(&self, name: &str, guard: &mut LockGuard) -> Result<MigrationOutcome> {
        let migration = match self.loader.load(name) {
            Ok(migration) => migration,
            Err(e) => {
                error!("==== Migration {} error: {:#}", name, e);
                return Ok(MigrationOutcome::Failed(format!("{:#}", e)));
            }
        };

        if migration.skip() {
            info!("==== Migration {} skipped", name);
            return Ok(MigrationOutcome::Skipped);
        }

        if self.store.get_status(name).await?.is_some() {
            debug!("Migration {} already applied", name);
            return Ok(MigrationOutcome::AlreadyApplied);
        }

        info!("==== Migration {} start: {}", name, migration.desc());
        guard.in_flight = Some(name.to_string());
        self.store
            .insert_status(MigrationStatusRecord::applied(name))
            .await
            .with_context(|| format!("Failed to record migration {}", name))?;

        // A panicking migration counts as a failure
        let result = match AssertUnwindSafe(migration.migrate()).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(anyhow!("panicked: {}", panic_message(panic.as_ref()))),
        };

        let outcome = match result {
            Ok(()) if migration.no_commit() => {
                self.store.delete_status(name).await?;
                info!("==== Migration {} complete, not committed", name);
                Ok(MigrationOutcome::NotCommitted)
            }
            Ok(()) => {
                info!("==== Migration {} complete", name);
                Ok(MigrationOutcome::Applied)
            }
            Err(e) => {
                error!("Migration {} failed: {:#}", name, e);
                self.store.delete_status(name).await?;
                error!("==== Migration {} error", name);
                Ok(MigrationOutcome::Failed(format!("{:#}", e)))
            }
        };
        guard.in_flight = None;
        outcome
    }

    /// Poll for the lock sentinel to disappear. Does not run any migration once it does.
    fn start_waiting(&self) {
        self.waiting.store(true, Ordering::SeqCst);

        let store = self.store.clone();
        let waiting = self.waiting.clone();
        let interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match store.get_status(LOCK_ID).await {
                    Ok(None) => break,
                    Ok(Some(_)) => debug!("Still waiting on migration lock"),
                    Err(e) => warn!("Failed to poll migration lock: {:#}", e),
                }
            }
            waiting.store(false, Ordering::SeqCst);
            info!("Migration lock released by its holder");
        });

        if let Some(previous) = self.poller.lock().replace(handle) {
            previous.abort();
        }
    }

    /// True while this process waits on a migration run by another process
    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Resolve once the lock this runner is waiting on has been released
    pub async fn wait_for_release(&self) {
        let handle = self.poller.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Migration lock poller failed: {}", e);
                }
            }
        }
    }

    /// Stop waiting and clear the waiting flag
    pub fn reset(&self) {
        if let Some(handle) = self.poller.lock().take() {
            handle.abort();
        }
        self.waiting.store(false, Ordering::SeqCst);
    }
}

/// Held while this process owns the lock sentinel. Dropping it without `release`,
/// on cancellation or unwinding, deletes the sentinel from a background task.
/// A migration interrupted between its status insert and its outcome is rolled back too.
struct LockGuard {
    store: Arc<dyn MigrationStatusStore>,
    held: bool,
    in_flight: Option<String>,
}

impl LockGuard {
    async fn release(mut self) {
        if let Some(name) = self.in_flight.clone() {
            warn!("Rolling back interrupted migration {}", name);
            if let Err(e) = self.store.delete_status(&name).await {
                error!("Failed to roll back migration {}: {:#}", name, e);
            }
            self.in_flight = None;
        }
        match self.store.delete_status(LOCK_ID).await {
            Ok(_) => info!("Released migration lock"),
            Err(e) => error!("Failed to release migration lock: {:#}", e),
        }
        self.held = false;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        let store = self.store.clone();
        let in_flight = self.in_flight.take();
        match Handle::try_current() {
            Ok(handle) => {
                warn!("Migration run interrupted; releasing lock in the background");
                handle.spawn(async move {
                    if let Some(name) = in_flight {
                        if let Err(e) = store.delete_status(&name).await {
                            error!("Failed to roll back migration {}: {:#}", name, e);
                        }
                    }
                    if let Err(e) = store.delete_status(LOCK_ID).await {
                        error!("Failed to release migration lock: {:#}", e);
                    }
                });
            }
            Err(_) => error!("Migration lock left in place: no runtime to release it on"),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Drop for MigrationRunner {
    fn drop(&mut self) {
        if let Some(handle) = self.poller.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct Scripted {
        calls: AtomicU32,
        fail: bool,
        skip: bool,
        no_commit: bool,
    }

    impl Scripted {
        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Migration for Scripted {
        async fn migrate(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("boom"));
            }
            Ok(())
        }

        fn skip(&self) -> bool {
            self.skip
        }

        fn no_commit(&self) -> bool {
            self.no_commit
        }
    }

    fn runner(store: &Arc<MemoryStore>, registry: MigrationRegistry, order: &[&str]) -> MigrationRunner {
        MigrationRunner::new(
            store.clone(),
            Arc::new(registry),
            order.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn test_failed_migration_does_not_abort_the_batch() {
        let store = Arc::new(MemoryStore::new());
        let m1 = Arc::new(Scripted::default());
        let m2 = Arc::new(Scripted { fail: true, ..Default::default() });
        let m3 = Arc::new(Scripted::default());
        let registry = MigrationRegistry::new()
            .with("m1", m1.clone())
            .with("m2", m2.clone())
            .with("m3", m3.clone());
        let runner = runner(&store, registry, &["m1", "m2", "m3"]);

        let report = runner.run().await;
        assert!(report.acquired);
        assert_eq!(report.error, None);
        assert_eq!(report.outcome("m1"), Some(&MigrationOutcome::Applied));
        assert_eq!(report.outcome("m2"), Some(&MigrationOutcome::Failed("boom".to_string())));
        assert_eq!(report.outcome("m3"), Some(&MigrationOutcome::Applied));
        assert_eq!(store.status_ids(), vec!["m1", "m3"]);

        // Rerun only retries the failed one
        let report = runner.run().await;
        assert_eq!(report.outcome("m1"), Some(&MigrationOutcome::AlreadyApplied));
        assert_eq!((m1.calls(), m2.calls(), m3.calls()), (1, 2, 1));
        assert_eq!(store.status_ids(), vec!["m1", "m3"]);
    }

    #[tokio::test]
    async fn test_no_commit_and_skip_leave_no_record() {
        let store = Arc::new(MemoryStore::new());
        let dry = Arc::new(Scripted { no_commit: true, ..Default::default() });
        let off = Arc::new(Scripted { skip: true, ..Default::default() });
        let registry = MigrationRegistry::new()
            .with("dry", dry.clone())
            .with("off", off.clone());
        let runner = runner(&store, registry, &["dry", "off"]);

        let report = runner.run().await;
        assert_eq!(report.outcome("dry"), Some(&MigrationOutcome::NotCommitted));
        assert_eq!(report.outcome("off"), Some(&MigrationOutcome::Skipped));
        assert!(store.status_ids().is_empty());

        runner.run().await;
        assert_eq!(dry.calls(), 2);
        assert_eq!(off.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_migration_is_reported_and_skipped_over() {
        let store = Arc::new(MemoryStore::new());
        let after = Arc::new(Scripted::default());
        let runner = runner(&store, MigrationRegistry::new().with("after", after.clone()), &["missing", "after"]);

        let report = runner.run().await;
        assert!(matches!(report.outcome("missing"), Some(MigrationOutcome::Failed(_))));
        assert_eq!(report.outcome("after"), Some(&MigrationOutcome::Applied));
        assert_eq!(store.status_ids(), vec!["after"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_lock_enters_waiting() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_status(MigrationStatusRecord::lock("someone-else"))
            .await
            .unwrap();

        let m1 = Arc::new(Scripted::default());
        let runner = runner(&store, MigrationRegistry::new().with("m1", m1.clone()), &["m1"]);

        let report = runner.run().await;
        assert!(!report.acquired);
        assert!(report.results.is_empty());
        assert!(runner.is_waiting());
        assert_eq!(m1.calls(), 0);

        // The foreign lock is left alone
        let lock = store.get_status(LOCK_ID).await.unwrap().unwrap();
        assert_eq!(lock.uuid.as_deref(), Some("someone-else"));

        store.delete_status(LOCK_ID).await.unwrap();
        runner.wait_for_release().await;
        assert!(!runner.is_waiting());

        // Waiting never runs anything by itself
        assert_eq!(m1.calls(), 0);
        let report = runner.run().await;
        assert!(report.acquired);
        assert_eq!(m1.calls(), 1);
    }

    #[tokio::test]
    async fn test_reset_stops_waiting() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_status(MigrationStatusRecord::lock("someone-else"))
            .await
            .unwrap();
        let runner = runner(&store, MigrationRegistry::new(), &[]);

        runner.run().await;
        assert!(runner.is_waiting());
        runner.reset();
        assert!(!runner.is_waiting());
        runner.wait_for_release().await;
    }

    #[tokio::test]
    async fn test_lock_released_after_run() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner(&store, MigrationRegistry::new().with("m1", Arc::new(Scripted::default())), &["m1"]);

        runner.run().await;
        assert!(store.get_status(LOCK_ID).await.unwrap().is_none());
        assert_eq!(store.status_ids(), vec!["m1"]);
    }

    struct Panics;

    #[async_trait::async_trait]
    impl Migration for Panics {
        async fn migrate(&self) -> Result<()> {
            panic!("migration bug");
        }
    }

    #[tokio::test]
    async fn test_panicking_migration_is_a_failure() {
        let store = Arc::new(MemoryStore::new());
        let next = Arc::new(Scripted::default());
        let registry = MigrationRegistry::new()
            .with("bad", Arc::new(Panics))
            .with("next", next.clone());
        let runner = runner(&store, registry, &["bad", "next"]);

        let report = runner.run().await;
        assert!(matches!(report.outcome("bad"), Some(MigrationOutcome::Failed(_))));
        assert_eq!(next.calls(), 1);
        assert_eq!(store.status_ids(), vec!["next"]);
    }

    /// Status lookups panic; everything else goes to the wrapped store
    struct PanicsOnLookup(Arc<MemoryStore>);

    #[async_trait::async_trait]
    impl MigrationStatusStore for PanicsOnLookup {
        async fn upsert_on_insert(&self, record: MigrationStatusRecord) -> Result<MigrationStatusRecord> {
            self.0.upsert_on_insert(record).await
        }

        async fn get_status(&self, _id: &str) -> Result<Option<MigrationStatusRecord>> {
            panic!("status table unreadable");
        }

        async fn insert_status(&self, record: MigrationStatusRecord) -> Result<()> {
            self.0.insert_status(record).await
        }

        async fn delete_status(&self, id: &str) -> Result<bool> {
            self.0.delete_status(id).await
        }
    }

    #[tokio::test]
    async fn test_store_panic_still_releases_lock() {
        let store = Arc::new(MemoryStore::new());
        let m1 = Arc::new(Scripted::default());
        let runner = MigrationRunner::new(
            Arc::new(PanicsOnLookup(store.clone())),
            Arc::new(MigrationRegistry::new().with("m1", m1.clone())),
            vec!["m1".to_string()],
        );

        let report = runner.run().await;
        assert!(report.acquired);
        assert_eq!(report.error.as_deref(), Some("panicked: status table unreadable"));
        assert_eq!(m1.calls(), 0);
        assert!(store.status_ids().is_empty());
    }

    struct Sleeps;

    #[async_trait::async_trait]
    impl Migration for Sleeps {
        async fn migrate(&self) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_run_releases_lock_and_rolls_back() {
        let store = Arc::new(MemoryStore::new());
        let interrupted = runner(&store, MigrationRegistry::new().with("slow", Arc::new(Sleeps)), &["slow"]);

        let cancelled = tokio::time::timeout(Duration::from_secs(1), interrupted.run()).await;
        assert!(cancelled.is_err());

        // Release happens on a background task
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert!(store.get_status(LOCK_ID).await.unwrap().is_none());
        assert!(store.get_status("slow").await.unwrap().is_none());

        // The next run starts over
        let retry = runner(&store, MigrationRegistry::new().with("slow", Arc::new(Scripted::default())), &["slow"]);
        let report = retry.run().await;
        assert!(report.acquired);
        assert_eq!(report.outcome("slow"), Some(&MigrationOutcome::Applied));
    }
}
