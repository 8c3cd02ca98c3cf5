use crate::{
    common::http::ResponseBody,
    server::handler::{self, Handler},
};
use bytes::Bytes;
use http::Request;
use http_body_util::BodyExt;
use hyper::{body::Incoming, service::service_fn, Response};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder as ServerBuilder,
};
use std::{
    future::{pending, Future},
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    sync::oneshot::Sender,
    task::JoinSet,
};

#[cfg(feature = "https")]
use crate::server::tls::TcpStreamPeekBuffer;
#[cfg(feature = "https")]
use tls_detect::is_encrypted;
#[cfg(feature = "https")]
use tokio_rustls::TlsAcceptor;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot bind to socket addr {0}: {1}")]
    SocketBindError(SocketAddr, std::io::Error),
    #[error("cannot parse socket address: {0}")]
    SocketAddrParseError(#[from] std::net::AddrParseError),
    #[error("cannot obtain local address: {0}")]
    LocalSocketAddrError(std::io::Error),
    #[error("cannot publish bound address {0}")]
    PublishSocketAddrError(SocketAddr),
    #[error("cannot buffer request body: {0}")]
    BufferError(hyper::Error),
    #[error("cannot process request: {0}")]
    HandlerError(#[from] handler::Error),
    #[error("TLS handshake failed: {0}")]
    TlsError(std::io::Error),
    #[error("connection error: {0}")]
    ServerConnectionError(Box<dyn std::error::Error + Send + Sync>),
}

pub struct StubServerConfig {
    pub port: Option<u16>,
    pub expose: bool,
    pub drain_timeout: Duration,
    #[cfg(feature = "https")]
    pub tls: Option<Arc<rustls::ServerConfig>>,
}

impl Default for StubServerConfig {
    fn default() -> Self {
        Self {
            port: None,
            expose: false,
            drain_timeout: Duration::from_millis(1000),
            #[cfg(feature = "https")]
            tls: None,
        }
    }
}

/// Accepts connections on a single port and hands every request to its [`Handler`]. When
/// TLS material is configured, the same port serves both HTTP and HTTPS.
pub struct StubServer<H>
where
    H: Handler + Send + Sync + 'static,
{
    handler: Box<H>,
    config: StubServerConfig,
}

impl<H> StubServer<H>
where
    H: Handler + Send + Sync + 'static,
{
    pub fn new(handler: Box<H>, config: StubServerConfig) -> Self {
        StubServer { handler, config }
    }

    pub async fn start(self) -> Result<(), Error> {
        self.start_with_signals(None, pending()).await
    }

    /// Binds the listener, publishes the bound address through `socket_addr_sender` and
    /// serves until `shutdown` resolves. In-flight connections then get at most the
    /// configured drain timeout to complete.
    pub async fn start_with_signals<F>(
        self,
        socket_addr_sender: Option<Sender<SocketAddr>>,
        shutdown: F,
    ) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let host = if self.config.expose {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        };
        let addr: SocketAddr = format!("{}:{}", host, self.config.port.unwrap_or(0)).parse()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::SocketBindError(addr, e))?;

        let local_addr = listener
            .local_addr()
            .map_err(Error::LocalSocketAddrError)?;

        if let Some(sender) = socket_addr_sender {
            sender.send(local_addr).map_err(Error::PublishSocketAddrError)?;
        }

        tracing::info!("listening on {}", local_addr);
        self.run_accept_loop(listener, shutdown).await
    }

    pub async fn run_accept_loop<F>(self, listener: TcpListener, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let drain_timeout = self.config.drain_timeout;
        let server = Arc::new(self);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((tcp_stream, remote_address)) => {
                            let server = server.clone();
                            connections.spawn(async move {
                                if let Err(err) = server.handle_tcp_stream(tcp_stream, remote_address).await {
                                    tracing::debug!("connection from {} closed: {}", remote_address, err);
                                }
                            });
                        }
                        Err(err) => tracing::error!("TCP error: {:?}", err),
                    }
                }
                // reap finished connections so the set does not grow unbounded
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = &mut shutdown => break,
            }
        }

        drop(listener);
        drain(connections, drain_timeout).await;
        Ok(())
    }

    async fn service(
        self: Arc<Self>,
        req: Request<Incoming>,
    ) -> Result<Response<ResponseBody>, Error> {
        tracing::trace!("new HTTP request received: {} {}", req.method(), req.uri());

        let req = buffer_request(req).await.map_err(Error::BufferError)?;

        // Returning an error here makes hyper abort the connection instead of responding.
        self.handler.handle(req).await.map_err(|err| {
            tracing::error!("failed to process request: {}", err);
            Error::HandlerError(err)
        })
    }

    async fn handle_tcp_stream(
        self: Arc<Self>,
        tcp_stream: TcpStream,
        remote_address: SocketAddr,
    ) -> Result<(), Error> {
        tracing::trace!("new TCP connection from {}", remote_address);

        #[cfg(feature = "https")]
        {
            if let Some(tls) = self.config.tls.clone() {
                let mut peek_buffer = TcpStreamPeekBuffer::new(&tcp_stream);
                if is_encrypted(&mut peek_buffer, 0).await {
                    tracing::trace!("TCP connection from {} is TLS encrypted", remote_address);

                    let tls_stream = TlsAcceptor::from(tls)
                        .accept(tcp_stream)
                        .await
                        .map_err(Error::TlsError)?;
                    return serve_connection(self, tls_stream).await;
                }
            }
        }

        serve_connection(self, tcp_stream).await
    }
}

async fn serve_connection<H, S>(server: Arc<StubServer<H>>, stream: S) -> Result<(), Error>
where
    H: Handler + Send + Sync + 'static,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut server_builder = ServerBuilder::new(TokioExecutor::new());
    server_builder.http1().preserve_header_case(true);
    server_builder.http2();

    server_builder
        .serve_connection(
            TokioIo::new(stream),
            service_fn(|req| server.clone().service(req)),
        )
        .await
        .map_err(Error::ServerConnectionError)
}

async fn drain(mut connections: JoinSet<()>, timeout: Duration) {
    if connections.is_empty() {
        return;
    }

    tracing::debug!(
        "waiting up to {:?} for {} open connection(s)",
        timeout,
        connections.len()
    );

    let drained = tokio::time::timeout(timeout, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        tracing::debug!("aborting {} connection(s) after drain timeout", connections.len());
        connections.shutdown().await;
    }
}

async fn buffer_request(req: Request<Incoming>) -> Result<Request<Bytes>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();
    Ok(Request::from_parts(parts, body))
}
