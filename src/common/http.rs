use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, Uri};
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Empty, Full};
#[cfg(feature = "https")]
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::convert::Infallible;
use thiserror::Error;

/// Body type of every response a stub server produces. Upstream bodies are streamed
/// through without buffering.
pub type ResponseBody = UnsyncBoxBody<Bytes, hyper::Error>;

pub fn full<T: Into<Bytes>>(chunk: T) -> ResponseBody {
    Full::new(chunk.into())
        .map_err(|never: Infallible| match never {})
        .boxed_unsync()
}

pub fn empty() -> ResponseBody {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| match never {})
        .boxed_unsync()
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot send request: {0}")]
    HyperUtilError(#[from] hyper_util::client::legacy::Error),
    #[error("cannot build request: {0}")]
    RequestError(#[from] http::Error),
    #[cfg(feature = "https")]
    #[error("cannot set up TLS client: {0}")]
    TlsError(#[from] rustls::Error),
}

/// Fetches the destination of a rewrite rule.
#[async_trait]
pub trait UpstreamClient {
    async fn get(&self, uri: Uri) -> Result<Response<ResponseBody>, Error>;
}

pub struct HyperUpstreamClient {
    #[cfg(feature = "https")]
    client: Client<HttpsConnector<HttpConnector>, Empty<Bytes>>,
    #[cfg(not(feature = "https"))]
    client: Client<HttpConnector, Empty<Bytes>>,
}

impl HyperUpstreamClient {
    #[cfg(feature = "https")]
    pub fn new() -> Result<Self, Error> {
        // Another component may already have installed a provider, which is fine.
        if rustls::crypto::CryptoProvider::get_default().is_none() {
            let _ = rustls::crypto::ring::default_provider().install_default();
        }

        let https_connector = match hyper_rustls::HttpsConnectorBuilder::new().with_native_roots() {
            Ok(builder) => builder,
            Err(err) => {
                tracing::warn!(
                    "cannot load native root certificates, HTTPS rewrite targets will be rejected: {}",
                    err
                );
                hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(empty_root_config()?)
            }
        }
        .https_or_http()
        .enable_http1()
        .build();

        Ok(Self {
            client: Client::builder(TokioExecutor::new()).build(https_connector),
        })
    }

    #[cfg(not(feature = "https"))]
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
        })
    }
}

#[cfg(feature = "https")]
fn empty_root_config() -> Result<rustls::ClientConfig, Error> {
    let provider = std::sync::Arc::new(rustls::crypto::ring::default_provider());
    Ok(rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(rustls::RootCertStore::empty())
        .with_no_client_auth())
}

#[async_trait]
impl UpstreamClient for HyperUpstreamClient {
    async fn get(&self, uri: Uri) -> Result<Response<ResponseBody>, Error> {
        tracing::debug!("fetching upstream resource {}", uri);

        let req = Request::get(uri).body(Empty::new())?;
        let res = self.client.request(req).await?;

        let (parts, body) = res.into_parts();
        Ok(Response::from_parts(parts, body.boxed_unsync()))
    }
}
