//! Process shutdown: one coordinator per process turns SIGINT/SIGTERM into a
//! `watch` flag and tears the sandbox pool down.

use crate::sandbox::SandboxPool;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

static INSTALLED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("Shutdown coordinator already installed for this process")]
    AlreadyInstalled,

    #[error("Failed to register signal handler: {0}")]
    Signal(String),
}

/// Observer side of the shutdown flag.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl ShutdownSignal {
    /// A signal that never fires. For one-shot commands and tests.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested. Pends forever if the trigger
    /// was dropped without firing.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Sender side of the shutdown flag.
#[derive(Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (
        ShutdownTrigger { tx: Arc::new(tx) },
        ShutdownSignal {
            rx,
            _keepalive: None,
        },
    )
}

pub struct ShutdownCoordinator {
    trigger: ShutdownTrigger,
    signal: ShutdownSignal,
    teardown: JoinHandle<usize>,
}

impl ShutdownCoordinator {
    /// Listen for SIGINT/SIGTERM (ctrl-c elsewhere). On the first signal,
    /// flip the shutdown flag and run `SandboxPool::shutdown_all`.
    ///
    /// Only one coordinator may be installed per process.
    pub fn install(pool: SandboxPool) -> Result<Self, ShutdownError> {
        if INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(ShutdownError::AlreadyInstalled);
        }
        match os_signal() {
            Ok(signal) => Ok(Self::spawn(pool, signal)),
            Err(e) => {
                INSTALLED.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Coordinator driven only by `trigger`. Does not count as the
    /// process-wide install.
    pub fn without_signals(pool: SandboxPool) -> Self {
        Self::spawn(pool, std::future::pending())
    }

    fn spawn<F>(pool: SandboxPool, os_signal: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (trigger, signal) = channel();
        let task_trigger = trigger.clone();
        let mut task_signal = signal.clone();

        let teardown = tokio::spawn(async move {
            tokio::select! {
                _ = os_signal => {
                    tracing::info!("shutdown signal received");
                    task_trigger.trigger();
                }
                _ = task_signal.cancelled() => {
                    tracing::info!("shutdown requested");
                }
            }
            pool.shutdown_all().await
        });

        Self {
            trigger,
            signal,
            teardown,
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    pub fn trigger(&self) {
        self.trigger.trigger();
    }

    /// A trigger that can fire this coordinator from elsewhere.
    pub fn trigger_handle(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    /// Wait for the pool teardown to finish. Returns how many sandboxes were
    /// shut down.
    pub async fn wait(self) -> usize {
        match self.teardown.await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "sandbox teardown task failed");
                0
            }
        }
    }

    /// Trigger and wait.
    pub async fn shutdown(self) -> usize {
        self.trigger();
        self.wait().await
    }
}

#[cfg(unix)]
fn os_signal() -> Result<impl Future<Output = ()> + Send + 'static, ShutdownError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt =
        signal(SignalKind::interrupt()).map_err(|e| ShutdownError::Signal(e.to_string()))?;
    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| ShutdownError::Signal(e.to_string()))?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
    })
}

#[cfg(not(unix))]
fn os_signal() -> Result<impl Future<Output = ()> + Send + 'static, ShutdownError> {
    Ok(async {
        let _ = tokio::signal::ctrl_c().await;
    })
}
