use super::{CommandOutput, Sandbox, SandboxError, SandboxOptions, SandboxProvider};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Bounded pool of live sandboxes, at most one per tenant key.
///
/// Callers past the concurrency limit wait in FIFO order. A released slot is
/// handed directly to the oldest waiter, so late arrivals cannot overtake.
#[derive(Clone)]
pub struct SandboxPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    provider: Arc<dyn SandboxProvider>,
    options: SandboxOptions,
    concurrency: usize,
    state: Mutex<PoolState>,
}

enum Entry {
    /// Creation in flight; same-key callers park here instead of taking a slot.
    Creating(Vec<oneshot::Sender<()>>),
    Ready(Arc<dyn Sandbox>),
}

enum Wake {
    /// A slot was transferred to the waiter.
    Slot,
    /// Pool was torn down; start over.
    Retry,
}

#[derive(Default)]
struct PoolState {
    entries: HashMap<String, Entry>,
    live: usize,
    waiters: VecDeque<oneshot::Sender<Wake>>,
    /// Bumped by `shutdown_all`; creations started before it are discarded.
    generation: u64,
}

impl PoolState {
    /// Hand the slot to the oldest live waiter, or give it back.
    fn free_slot(&mut self) {
        while let Some(tx) = self.waiters.pop_front() {
            if tx.send(Wake::Slot).is_ok() {
                return;
            }
        }
        self.live = self.live.saturating_sub(1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub live: usize,
    pub waiting: usize,
    pub tenants: usize,
}

enum Step {
    Ready(Arc<dyn Sandbox>),
    AwaitCreation(oneshot::Receiver<()>),
    Create(u64),
    AwaitSlot(oneshot::Receiver<Wake>),
}

impl SandboxPool {
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        concurrency: usize,
        options: SandboxOptions,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                provider,
                options,
                concurrency: concurrency.max(1),
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    pub fn stats(&self) -> PoolStats {
        let st = self.inner.state.lock().unwrap();
        PoolStats {
            live: st.live,
            waiting: st.waiters.iter().filter(|tx| !tx.is_closed()).count(),
            tenants: st.entries.len(),
        }
    }

    /// Borrow the sandbox for `tenant_key`, creating it if needed.
    ///
    /// Suspends while the pool is at capacity. Two callers for the same new
    /// key share one creation and one slot.
    pub async fn acquire(&self, tenant_key: &str) -> Result<SandboxLease, SandboxError> {
        let mut held_slot = false;

        loop {
            let step = {
                let mut guard = self.inner.state.lock().unwrap();
                let st = &mut *guard;
                let holding = std::mem::take(&mut held_slot);
                st.waiters.retain(|tx| !tx.is_closed());

                let step = match st.entries.get_mut(tenant_key) {
                    Some(Entry::Ready(sandbox)) => Step::Ready(Arc::clone(sandbox)),
                    Some(Entry::Creating(pending)) => {
                        let (tx, rx) = oneshot::channel();
                        pending.push(tx);
                        Step::AwaitCreation(rx)
                    }
                    None => {
                        if holding
                            || (st.live < self.inner.concurrency && st.waiters.is_empty())
                        {
                            Step::Create(st.generation)
                        } else {
                            let (tx, rx) = oneshot::channel();
                            st.waiters.push_back(tx);
                            Step::AwaitSlot(rx)
                        }
                    }
                };

                match &step {
                    Step::Create(_) => {
                        if !holding {
                            st.live += 1;
                        }
                        st.entries
                            .insert(tenant_key.to_string(), Entry::Creating(Vec::new()));
                    }
                    // another caller created the entry while we waited for a slot
                    Step::Ready(_) | Step::AwaitCreation(_) if holding => st.free_slot(),
                    _ => {}
                }
                step
            };

            match step {
                Step::Ready(sandbox) => {
                    return Ok(SandboxLease {
                        tenant_key: tenant_key.to_string(),
                        sandbox,
                    });
                }
                Step::AwaitCreation(rx) => {
                    let _ = rx.await;
                }
                Step::AwaitSlot(rx) => {
                    tracing::debug!(tenant_key, "sandbox pool at capacity, waiting");
                    let mut waiter = SlotWaiter {
                        rx: Some(rx),
                        inner: Arc::clone(&self.inner),
                    };
                    if let Some(Wake::Slot) = waiter.wait().await {
                        held_slot = true;
                    }
                }
                Step::Create(generation) => return self.create(tenant_key, generation).await,
            }
        }
    }

    async fn create(
        &self,
        tenant_key: &str,
        generation: u64,
    ) -> Result<SandboxLease, SandboxError> {
        let mut guard = CreationGuard {
            inner: Arc::clone(&self.inner),
            tenant_key: tenant_key.to_string(),
            generation,
            armed: true,
        };

        let sandbox = self
            .inner
            .provider
            .create(tenant_key, &self.inner.options)
            .await
            .inspect_err(|e| tracing::warn!(tenant_key, error = %e, "sandbox creation failed"))?;

        let stale = {
            let mut st = self.inner.state.lock().unwrap();
            if st.generation != generation {
                true
            } else {
                let previous = st
                    .entries
                    .insert(tenant_key.to_string(), Entry::Ready(Arc::clone(&sandbox)));
                if let Some(Entry::Creating(pending)) = previous {
                    for tx in pending {
                        let _ = tx.send(());
                    }
                }
                false
            }
        };
        guard.armed = false;

        if stale {
            // the reservation outlives the reset until this sandbox is gone
            let _slot = SlotReturn {
                inner: Arc::clone(&self.inner),
            };
            if let Err(e) = sandbox.shutdown().await {
                tracing::warn!(tenant_key, error = %e, "failed to shut down orphaned sandbox");
            }
            return Err(SandboxError::PoolShutDown);
        }

        tracing::info!(tenant_key, sandbox_id = sandbox.id(), "sandbox created");
        Ok(SandboxLease {
            tenant_key: tenant_key.to_string(),
            sandbox,
        })
    }

    /// Tear down the sandbox for `tenant_key` and free its slot.
    ///
    /// Unknown keys and keys whose sandbox is still being created are a no-op.
    /// The slot stays occupied until the teardown finishes.
    pub async fn release(&self, tenant_key: &str) -> Result<(), SandboxError> {
        let (sandbox, slot) = {
            let mut st = self.inner.state.lock().unwrap();
            match st.entries.remove(tenant_key) {
                Some(Entry::Ready(sandbox)) => (
                    sandbox,
                    SlotReturn {
                        inner: Arc::clone(&self.inner),
                    },
                ),
                Some(creating) => {
                    st.entries.insert(tenant_key.to_string(), creating);
                    return Ok(());
                }
                None => {
                    tracing::debug!(tenant_key, "release for unknown tenant ignored");
                    return Ok(());
                }
            }
        };

        let result = sandbox.shutdown().await;
        drop(slot);
        match &result {
            Ok(()) => tracing::info!(tenant_key, sandbox_id = sandbox.id(), "sandbox released"),
            Err(e) => tracing::warn!(tenant_key, error = %e, "sandbox shutdown failed on release"),
        }
        result
    }

    /// Tear down every live sandbox, reset the pool and wake all waiters.
    ///
    /// Waiters retry their acquisition against the emptied pool. A slot stays
    /// counted until its sandbox is gone: torn-down sandboxes free theirs as
    /// each shutdown finishes, and creations still in flight free theirs once
    /// they have discarded their sandbox. Returns how many sandboxes were
    /// shut down.
    pub async fn shutdown_all(&self) -> usize {
        let sandboxes: Vec<(String, Arc<dyn Sandbox>, SlotReturn)> = {
            let mut st = self.inner.state.lock().unwrap();
            st.generation += 1;
            for tx in st.waiters.drain(..) {
                let _ = tx.send(Wake::Retry);
            }
            st.entries
                .drain()
                .filter_map(|(key, entry)| match entry {
                    Entry::Ready(sandbox) => Some((
                        key,
                        sandbox,
                        SlotReturn {
                            inner: Arc::clone(&self.inner),
                        },
                    )),
                    Entry::Creating(pending) => {
                        for tx in pending {
                            let _ = tx.send(());
                        }
                        None
                    }
                })
                .collect()
        };

        let count = sandboxes.len();
        for (tenant_key, sandbox, slot) in sandboxes {
            if let Err(e) = sandbox.shutdown().await {
                tracing::warn!(tenant_key = %tenant_key, error = %e, "sandbox shutdown failed");
            }
            drop(slot);
        }
        tracing::info!(count, "sandbox pool shut down");
        count
    }
}

/// Parked acquisition. If dropped after a slot was handed over but before
/// the caller saw it, the slot is passed on.
struct SlotWaiter {
    rx: Option<oneshot::Receiver<Wake>>,
    inner: Arc<PoolInner>,
}

impl SlotWaiter {
    async fn wait(&mut self) -> Option<Wake> {
        let rx = self.rx.as_mut()?;
        let wake = rx.await.ok();
        self.rx = None;
        wake
    }
}

impl Drop for SlotWaiter {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if let Ok(Wake::Slot) = rx.try_recv() {
                if let Ok(mut st) = self.inner.state.lock() {
                    st.free_slot();
                }
            }
        }
    }
}

/// Undoes a reservation if creation fails or the acquiring future is dropped.
struct CreationGuard {
    inner: Arc<PoolInner>,
    tenant_key: String,
    generation: u64,
    armed: bool,
}

impl Drop for CreationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut st) = self.inner.state.lock() {
            if st.generation == self.generation {
                if let Some(Entry::Creating(pending)) = st.entries.remove(&self.tenant_key) {
                    for tx in pending {
                        let _ = tx.send(());
                    }
                }
            }
            st.free_slot();
        }
    }
}

/// Frees a slot once its sandbox's teardown is over, even if the tearing
/// down future is dropped midway.
struct SlotReturn {
    inner: Arc<PoolInner>,
}

impl Drop for SlotReturn {
    fn drop(&mut self) {
        if let Ok(mut st) = self.inner.state.lock() {
            st.free_slot();
        }
    }
}

/// A borrowed sandbox. Shutdown stays with the pool.
#[derive(Clone)]
pub struct SandboxLease {
    tenant_key: String,
    sandbox: Arc<dyn Sandbox>,
}

impl std::fmt::Debug for SandboxLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxLease")
            .field("tenant_key", &self.tenant_key)
            .field("sandbox_id", &self.sandbox.id())
            .finish()
    }
}

impl SandboxLease {
    pub fn tenant_key(&self) -> &str {
        &self.tenant_key
    }

    pub fn sandbox_id(&self) -> &str {
        self.sandbox.id()
    }

    pub fn same_sandbox(&self, other: &SandboxLease) -> bool {
        Arc::ptr_eq(&self.sandbox, &other.sandbox)
    }

    pub async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), SandboxError> {
        self.sandbox.write_file(path, contents).await
    }

    pub async fn run(&self, command: &str) -> Result<CommandOutput, SandboxError> {
        self.sandbox.run(command).await
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        self.sandbox.read_file(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        created: AtomicUsize,
        live: AtomicUsize,
        max_live: AtomicUsize,
        shut_down: AtomicUsize,
    }

    struct FakeSandbox {
        id: String,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl Sandbox for FakeSandbox {
        fn id(&self) -> &str {
            &self.id
        }
        async fn write_file(&self, _: &str, _: &[u8]) -> Result<(), SandboxError> {
            Ok(())
        }
        async fn run(&self, _: &str) -> Result<CommandOutput, SandboxError> {
            Ok(CommandOutput {
                output: String::new(),
                exit_code: 0,
            })
        }
        async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
            Err(SandboxError::FileNotFound { path: path.into() })
        }
        async fn shutdown(&self) -> Result<(), SandboxError> {
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
            self.counters.shut_down.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeProvider {
        counters: Arc<Counters>,
        fail_for: Option<&'static str>,
        /// Creation for this tenant parks until the gate is opened.
        gate: Option<(&'static str, Arc<tokio::sync::Notify>)>,
    }

    #[async_trait]
    impl SandboxProvider for FakeProvider {
        async fn create(
            &self,
            tenant_key: &str,
            _: &SandboxOptions,
        ) -> Result<Arc<dyn Sandbox>, SandboxError> {
            tokio::task::yield_now().await;
            if let Some((gated, gate)) = &self.gate {
                if *gated == tenant_key {
                    gate.notified().await;
                }
            }
            if self.fail_for == Some(tenant_key) {
                return Err(SandboxError::Create("quota exceeded".into()));
            }
            let n = self.counters.created.fetch_add(1, Ordering::SeqCst);
            let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.counters.max_live.fetch_max(live, Ordering::SeqCst);
            Ok(Arc::new(FakeSandbox {
                id: format!("sb-{n}"),
                counters: self.counters.clone(),
            }))
        }
    }

    fn pool(concurrency: usize, fail_for: Option<&'static str>) -> (SandboxPool, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let provider = Arc::new(FakeProvider {
            counters: counters.clone(),
            fail_for,
            gate: None,
        });
        (
            SandboxPool::new(provider, concurrency, SandboxOptions::default()),
            counters,
        )
    }

    #[tokio::test]
    async fn same_tenant_reuses_one_sandbox_and_one_slot() {
        let (pool, counters) = pool(2, None);
        let a = pool.acquire("org-1").await.unwrap();
        let b = pool.acquire("org-1").await.unwrap();

        assert!(a.same_sandbox(&b));
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().live, 1);
    }

    #[tokio::test]
    async fn concurrent_first_acquires_for_one_tenant_create_once() {
        let (pool, counters) = pool(1, None);
        let (a, b) = tokio::join!(pool.acquire("org-1"), pool.acquire("org-1"));

        assert!(a.unwrap().same_sandbox(&b.unwrap()));
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn release_of_unknown_tenant_is_noop() {
        let (pool, counters) = pool(1, None);
        pool.release("nobody").await.unwrap();
        assert_eq!(pool.stats().live, 0);
        assert_eq!(counters.shut_down.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn release_frees_slot_and_tears_down() {
        let (pool, counters) = pool(1, None);
        pool.acquire("org-1").await.unwrap();
        pool.release("org-1").await.unwrap();

        assert_eq!(counters.shut_down.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats(), PoolStats { live: 0, waiting: 0, tenants: 0 });

        let again = pool.acquire("org-1").await.unwrap();
        assert_eq!(again.sandbox_id(), "sb-1");
    }

    #[tokio::test]
    async fn failed_creation_frees_its_slot() {
        let (pool, _) = pool(1, Some("bad"));
        let err = pool.acquire("bad").await.unwrap_err();
        assert_eq!(err, SandboxError::Create("quota exceeded".into()));
        assert_eq!(pool.stats().live, 0);

        pool.acquire("good").await.unwrap();
        assert_eq!(pool.stats().live, 1);
    }

    #[tokio::test]
    async fn shutdown_all_wakes_waiters() {
        let (pool, counters) = pool(1, None);
        pool.acquire("org-1").await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire("org-2").await })
        };
        while pool.stats().waiting == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(pool.shutdown_all().await, 1);
        let lease = waiter.await.unwrap().unwrap();
        assert_eq!(lease.tenant_key(), "org-2");
        assert_eq!(counters.shut_down.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().live, 1);
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_leak_a_slot() {
        let (pool, _) = pool(1, None);
        pool.acquire("org-1").await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire("org-2").await })
        };
        while pool.stats().waiting == 0 {
            tokio::task::yield_now().await;
        }
        waiter.abort();
        let _ = waiter.await;

        pool.release("org-1").await.unwrap();
        assert_eq!(pool.stats().live, 0);
        pool.acquire("org-3").await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_all_keeps_in_flight_creation_counted() {
        let counters = Arc::new(Counters::default());
        let gate = Arc::new(tokio::sync::Notify::new());
        let provider = Arc::new(FakeProvider {
            counters: counters.clone(),
            fail_for: None,
            gate: Some(("slow", gate.clone())),
        });
        let pool = SandboxPool::new(provider, 1, SandboxOptions::default());

        let slow = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire("slow").await })
        };
        while pool.stats().tenants == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(pool.shutdown_all().await, 0);
        assert_eq!(pool.stats().live, 1);

        let next = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire("org-2").await })
        };
        while pool.stats().waiting == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(counters.created.load(Ordering::SeqCst), 0);

        gate.notify_one();
        assert_eq!(slow.await.unwrap().unwrap_err(), SandboxError::PoolShutDown);
        let lease = next.await.unwrap().unwrap();

        assert_eq!(lease.tenant_key(), "org-2");
        assert_eq!(counters.created.load(Ordering::SeqCst), 2);
        assert_eq!(counters.max_live.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().live, 1);
    }
}
