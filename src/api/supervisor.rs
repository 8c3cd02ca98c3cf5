use crate::common::runtime::shutdown_signal;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};
use tokio::{
    process::Child,
    sync::{mpsc, watch},
};

/// Kill switch for a single supervised child process.
#[derive(Clone)]
pub struct ChildGuard {
    id: u64,
    pid: Option<u32>,
    kill: mpsc::UnboundedSender<()>,
    exited: watch::Receiver<bool>,
}

impl ChildGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// Requests the child to be killed without waiting for it.
    pub fn start_kill(&self) {
        let _ = self.kill.send(());
    }

    /// Kills the child and waits until it has been reaped.
    pub async fn kill(&self) {
        self.start_kill();
        self.wait().await;
    }

    /// Waits until the child has exited, for whatever reason.
    pub async fn wait(&self) {
        let mut exited = self.exited.clone();
        // An error means the reaper is gone, which only happens after the child exited.
        let _ = exited.wait_for(|exited| *exited).await;
    }
}

/// Owns the kill switches of every child process spawned by a driver, so that all of them
/// can be torn down at once.
#[derive(Default)]
pub struct ProcessSupervisor {
    children: Mutex<BTreeMap<u64, ChildGuard>>,
    next_id: AtomicU64,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, ChildGuard>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes ownership of `child`. A background task reaps it once it exits or once it is
    /// killed through the returned guard.
    pub fn adopt(&self, mut child: Child) -> ChildGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pid = child.id();
        let (kill_tx, mut kill_rx) = mpsc::unbounded_channel::<()>();
        let (exited_tx, exited_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => tracing::debug!("stub server {:?} exited with {}", pid, status),
                        Err(err) => tracing::warn!("cannot wait for stub server {:?}: {}", pid, err),
                    }
                }
                // Also fires once every guard has been dropped.
                _ = kill_rx.recv() => {
                    if let Err(err) = child.kill().await {
                        tracing::warn!("cannot kill stub server {:?}: {}", pid, err);
                    } else {
                        tracing::debug!("killed stub server {:?}", pid);
                    }
                }
            }
            let _ = exited_tx.send(true);
        });

        let guard = ChildGuard {
            id,
            pid,
            kill: kill_tx,
            exited: exited_rx,
        };
        self.lock().insert(id, guard.clone());
        guard
    }

    /// Stops tracking a child. The child itself is left alone.
    pub fn forget(&self, id: u64) -> Option<ChildGuard> {
        self.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Force-kills every tracked child and waits until all of them have been reaped.
    pub async fn kill_all(&self) {
        let children: Vec<ChildGuard> = std::mem::take(&mut *self.lock()).into_values().collect();

        if !children.is_empty() {
            tracing::info!("killing {} stub server(s)", children.len());
        }

        for child in &children {
            child.start_kill();
        }
        for child in &children {
            child.wait().await;
        }
    }

    /// Kills all children when this process receives Ctrl-C or SIGTERM, then exits.
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            supervisor.kill_all().await;
            std::process::exit(0);
        });
    }
}
