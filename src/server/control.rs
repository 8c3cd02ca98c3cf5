//! The control side of a stub server: announces the bound port, applies rule batches as
//! they arrive on the control channel and acknowledges each one with the merged rule set.

use crate::{
    common::{
        channel::{self, MessageReader, MessageWriter},
        data::{ControlMessage, ServerMessage},
    },
    server::{
        handler::Handler,
        registry::RuleStore,
        server::{self as http_server, StubServer},
    },
};
use std::{fmt, future::Future, sync::Arc};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{oneshot, watch},
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("stub server failed: {0}")]
    ServerError(#[from] http_server::Error),
    #[error("stub server stopped unexpectedly")]
    ServerStopped,
    #[error("control channel failed: {0}")]
    ChannelError(#[from] channel::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Starting,
    Listening,
    Idle,
    ApplyingBatch,
    Terminating,
    Stopped,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Publishes lifecycle transitions to any number of observers.
#[derive(Clone)]
pub struct LifecycleTracker {
    sender: Arc<watch::Sender<Lifecycle>>,
}

impl Default for LifecycleTracker {
    fn default() -> Self {
        let (sender, _) = watch::channel(Lifecycle::Starting);
        Self {
            sender: Arc::new(sender),
        }
    }
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Lifecycle {
        *self.sender.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.sender.subscribe()
    }

    pub fn set(&self, state: Lifecycle) {
        let previous = self.sender.send_replace(state);
        if previous != state {
            tracing::debug!("lifecycle: {} -> {}", previous, state);
        }
    }
}

/// Why the control loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    TerminateMessage,
    ChannelClosed,
    Signal,
}

/// Runs a stub server until it is told to terminate.
///
/// The server is started first. Once its listener is bound, `{"ready":true,"port":N}` is
/// written to `writer`. Every control message carrying rules is then merged into `rules`
/// and acknowledged with the full rule snapshot. The server terminates on a
/// `{"terminate":true}` message, when `reader` is closed or when `shutdown` resolves.
pub async fn run<H, S, R, W, F>(
    server: StubServer<H>,
    rules: Arc<S>,
    reader: MessageReader<R>,
    mut writer: MessageWriter<W>,
    tracker: LifecycleTracker,
    shutdown: F,
) -> Result<(), Error>
where
    H: Handler + Send + Sync + 'static,
    S: RuleStore + Send + Sync + 'static,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: Future<Output = ()>,
{
    tracker.set(Lifecycle::Starting);

    let (addr_tx, addr_rx) = oneshot::channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server_task = tokio::spawn(server.start_with_signals(Some(addr_tx), async move {
        let _ = stop_rx.await;
    }));

    let addr = match addr_rx.await {
        Ok(addr) => addr,
        Err(_) => {
            tracker.set(Lifecycle::Stopped);
            return match server_task.await {
                Ok(Err(err)) => Err(err.into()),
                _ => Err(Error::ServerStopped),
            };
        }
    };

    tracker.set(Lifecycle::Listening);
    writer.write(&ServerMessage::ready(addr.port())).await?;
    tracker.set(Lifecycle::Idle);

    let control = control_loop(rules.as_ref(), reader, &mut writer, &tracker);
    tokio::pin!(control);
    tokio::pin!(shutdown);

    let outcome = tokio::select! {
        exit = &mut control => exit,
        _ = &mut shutdown => Ok(Exit::Signal),
        finished = &mut server_task => {
            tracker.set(Lifecycle::Stopped);
            return match finished {
                Ok(Err(err)) => Err(err.into()),
                _ => Err(Error::ServerStopped),
            };
        }
    };

    tracker.set(Lifecycle::Terminating);
    if let Ok(exit) = &outcome {
        tracing::info!("terminating: {:?}", exit);
    }

    let _ = stop_tx.send(());
    let served = server_task.await;
    tracker.set(Lifecycle::Stopped);

    outcome?;
    match served {
        Ok(result) => Ok(result?),
        Err(err) => {
            tracing::error!("stub server task failed: {}", err);
            Ok(())
        }
    }
}

async fn control_loop<S, R, W>(
    rules: &S,
    mut reader: MessageReader<R>,
    writer: &mut MessageWriter<W>,
    tracker: &LifecycleTracker,
) -> Result<Exit, Error>
where
    S: RuleStore,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let message: ControlMessage = match reader.read().await {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(Exit::ChannelClosed),
            Err(channel::Error::Decode(line, err)) => {
                tracing::warn!("ignoring malformed control message '{}': {}", line, err);
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        let terminate = message.is_terminate();

        if let Some(batch) = message.rules {
            tracker.set(Lifecycle::ApplyingBatch);
            let snapshot = rules.apply_rule_set(batch);
            tracing::info!("rules applied, {} rule(s) active", snapshot.len());
            writer.write(&ServerMessage::ack(snapshot)).await?;
            tracker.set(Lifecycle::Idle);
        } else if !terminate {
            tracing::warn!("ignoring control message without a known key");
        }

        if terminate {
            return Ok(Exit::TerminateMessage);
        }
    }
}
