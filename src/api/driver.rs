use crate::{
    api::{
        ack::AckWaiter, builder::ConfigurationBatch, supervisor::ChildGuard, Error,
        ProcessSupervisor,
    },
    common::{
        channel::{self, MessageReader, MessageWriter},
        data::{ControlMessage, RuleSet, ServerMessage},
    },
};
use std::{path::PathBuf, process::Stdio, sync::Arc, time::Duration};
use tokio::{
    process::{ChildStdin, Command},
    sync::mpsc,
    time::Instant,
};

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the driver finds the stub server binary and how it starts it.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub program: PathBuf,
    pub port: u16,
    pub cert_dir: Option<PathBuf>,
    pub ack_timeout: Duration,
    pub envs: Vec<(String, String)>,
    pub args: Vec<String>,
}

impl DriverConfig {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            port: crate::server::DEFAULT_PORT,
            cert_dir: None,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            envs: Vec::new(),
            args: Vec::new(),
        }
    }

    /// Uses the binary named by `HTTPSTUB_BIN`, or `httpstub` from `PATH`.
    pub fn from_env() -> Self {
        let program = std::env::var_os("HTTPSTUB_BIN")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("httpstub"));
        Self::new(program)
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn cert_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cert_dir = Some(dir.into());
        self
    }

    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Spawns stub servers and keeps track of them in a [`ProcessSupervisor`].
pub struct Driver {
    config: DriverConfig,
    supervisor: Arc<ProcessSupervisor>,
}

impl Driver {
    pub fn new(config: DriverConfig) -> Self {
        Self::with_supervisor(config, Arc::new(ProcessSupervisor::new()))
    }

    pub fn with_supervisor(config: DriverConfig, supervisor: Arc<ProcessSupervisor>) -> Self {
        Self { config, supervisor }
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn stub(&self) -> Stub {
        Stub {
            config: self.config.clone(),
            supervisor: self.supervisor.clone(),
            batches: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Spawning,
    AwaitingAcks(usize),
    Ready,
    Killed,
}

/// A stub server that has not been started yet, together with the batches it should be
/// configured with.
pub struct Stub {
    config: DriverConfig,
    supervisor: Arc<ProcessSupervisor>,
    batches: Vec<ConfigurationBatch>,
}

impl Stub {
    pub fn configure<B: Into<ConfigurationBatch>>(mut self, batch: B) -> Self {
        self.batches.push(batch.into());
        self
    }

    /// Spawns the server, sends all batches in order and resolves once every batch has been
    /// acknowledged, or once the server reported ready if there are no batches.
    pub async fn run(self) -> Result<StubHandle, Error> {
        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .env("PORT", self.config.port.to_string())
            .envs(self.config.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(dir) = &self.config.cert_dir {
            command.env("HTTPSTUB_CERT_DIR", dir);
        }

        let mut child = command
            .spawn()
            .map_err(|err| Error::SpawnError(self.config.program.clone(), err))?;
        tracing::debug!("spawned stub server {:?}", child.id());

        let stdin = child.stdin.take().ok_or(Error::ServerExited)?;
        let stdout = child.stdout.take().ok_or(Error::ServerExited)?;
        let guard = self.supervisor.adopt(child);

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_server_messages(MessageReader::new(stdout), tx));

        let mut handle = StubHandle {
            state: DriverState::Spawning,
            port: 0,
            ack_timeout: self.config.ack_timeout,
            writer: MessageWriter::new(stdin),
            waiter: AckWaiter::new(rx),
            guard,
            supervisor: self.supervisor,
        };

        match handle.start(self.batches).await {
            Ok(()) => Ok(handle),
            Err(err) => {
                handle.kill().await;
                Err(err)
            }
        }
    }
}

async fn forward_server_messages<R>(
    mut reader: MessageReader<R>,
    messages: mpsc::UnboundedSender<ServerMessage>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    loop {
        match reader.read::<ServerMessage>().await {
            Ok(Some(message)) => {
                if messages.send(message).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(channel::Error::Decode(line, err)) => {
                tracing::warn!("unreadable message from stub server '{}': {}", line, err);
            }
            Err(err) => {
                tracing::warn!("lost connection to stub server: {}", err);
                break;
            }
        }
    }
}

/// A running, configured stub server. Dropping the handle kills the server.
pub struct StubHandle {
    state: DriverState,
    port: u16,
    ack_timeout: Duration,
    writer: MessageWriter<ChildStdin>,
    waiter: AckWaiter,
    guard: ChildGuard,
    supervisor: Arc<ProcessSupervisor>,
}

impl StubHandle {
    async fn start(&mut self, batches: Vec<ConfigurationBatch>) -> Result<(), Error> {
        for batch in &batches {
            self.writer.write(&batch.to_message()).await?;
        }

        let deadline = Instant::now() + self.ack_timeout;
        self.port = self.waiter.wait_ready_until(deadline).await?;

        self.state = DriverState::AwaitingAcks(batches.len());
        self.waiter.wait_acks_until(batches.len(), deadline).await?;

        self.state = DriverState::Ready;
        tracing::debug!("stub server ready on port {}", self.port);
        Ok(())
    }

    /// Sends another batch and waits for its acknowledgement. Returns the merged rule set.
    pub async fn configure<B: Into<ConfigurationBatch>>(&mut self, batch: B) -> Result<&RuleSet, Error> {
        if self.state == DriverState::Killed {
            return Err(Error::ServerExited);
        }

        let batch = batch.into();
        self.writer.write(&batch.to_message()).await?;

        self.state = DriverState::AwaitingAcks(1);
        self.waiter.wait_acks(1, self.ack_timeout).await?;
        self.state = DriverState::Ready;

        Ok(self.waiter.rules())
    }

    /// The rule set from the most recent acknowledgement.
    pub fn rules(&self) -> &RuleSet {
        self.waiter.rules()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub fn https_url(&self, path: &str) -> String {
        format!("https://localhost:{}{}", self.port, path)
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.guard.pid()
    }

    /// Force-kills the server and waits until it has been reaped.
    pub async fn kill(&mut self) {
        self.guard.kill().await;
        self.supervisor.forget(self.guard.id());
        self.state = DriverState::Killed;
    }

    /// Asks the server to shut down gracefully. Falls back to killing it if it does not exit
    /// within the acknowledgement timeout.
    pub async fn terminate(mut self) -> Result<(), Error> {
        let sent = self.writer.write(&ControlMessage::terminate()).await;

        let exited = match sent {
            Ok(()) => tokio::time::timeout(self.ack_timeout, self.guard.wait())
                .await
                .is_ok(),
            Err(_) => false,
        };

        if !exited {
            tracing::warn!("stub server did not terminate in time, killing it");
        }
        self.kill().await;
        sent.map_err(Error::from)
    }
}

impl Drop for StubHandle {
    fn drop(&mut self) {
        if self.state != DriverState::Killed {
            self.guard.start_kill();
            self.supervisor.forget(self.guard.id());
        }
    }
}

impl From<channel::Error> for Error {
    fn from(err: channel::Error) -> Self {
        match err {
            channel::Error::Io(err) if err.kind() == std::io::ErrorKind::BrokenPipe => {
                Error::ServerExited
            }
            err => Error::ChannelError(err),
        }
    }
}
