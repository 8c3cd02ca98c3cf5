use crate::{
    common::{
        data::{self, RuleSet},
        http::{self, HyperUpstreamClient, UpstreamClient},
    },
    server::{
        executor::{self, ActionExecutor, DEFAULT_ERROR_TEMPLATE},
        handler::StubHandler,
        registry::{RuleRegistry, RuleStore},
        server::{StubServer, StubServerConfig},
    },
};
use ::http::{HeaderName, HeaderValue};
use std::{path::PathBuf, str::FromStr, sync::Arc, time::Duration};
use thiserror::Error;

#[cfg(feature = "https")]
use crate::server::tls;

pub const DEFAULT_PORT: u16 = 9876;
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot load initial rules from {0}: {1}")]
    RulesFileError(PathBuf, data::Error),
    #[error("cannot read error template {0}: {1}")]
    ErrorTemplateError(PathBuf, std::io::Error),
    #[error("invalid default header '{0}': expected NAME:VALUE")]
    InvalidHeader(String),
    #[error("cannot set up upstream client: {0}")]
    UpstreamClientError(#[from] http::Error),
    #[cfg(feature = "https")]
    #[error("cannot set up TLS: {0}")]
    TlsError(#[from] tls::Error),
}

/// The stub server as assembled by [`StubServerBuilder::build`].
pub type DefaultStubServer = StubServer<StubHandler<RuleRegistry>>;

/// Collects the server configuration, falling back to defaults for everything that is not
/// set, and wires the registry, the action executor and the TLS material together.
#[derive(Default)]
pub struct StubServerBuilder {
    port: Option<u16>,
    expose: Option<bool>,
    cert_dir: Option<PathBuf>,
    rules_file: Option<PathBuf>,
    error_template: Option<PathBuf>,
    headers: Vec<String>,
    drain_timeout: Option<Duration>,
    upstream: Option<Arc<dyn UpstreamClient + Send + Sync>>,
}

impl StubServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the listening port. Port 0 picks an ephemeral port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn port_option(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    /// Binds to all interfaces instead of loopback only.
    pub fn expose(mut self, expose: bool) -> Self {
        self.expose = Some(expose);
        self
    }

    pub fn expose_option(mut self, expose: Option<bool>) -> Self {
        self.expose = expose;
        self
    }

    /// Sets the directory containing `server.cert` and `server.key`. Defaults to the
    /// `cert` directory next to the executable.
    pub fn cert_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cert_dir = Some(dir.into());
        self
    }

    pub fn cert_dir_option(mut self, dir: Option<PathBuf>) -> Self {
        self.cert_dir = dir;
        self
    }

    /// Preloads rules from a JSON or YAML file before the server starts listening.
    pub fn rules_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.rules_file = Some(path.into());
        self
    }

    pub fn rules_file_option(mut self, path: Option<PathBuf>) -> Self {
        self.rules_file = path;
        self
    }

    /// Replaces the built-in XML error template. The template must contain the
    /// `error-code` placeholder.
    pub fn error_template<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.error_template = Some(path.into());
        self
    }

    pub fn error_template_option(mut self, path: Option<PathBuf>) -> Self {
        self.error_template = path;
        self
    }

    /// Adds a default response header in `NAME:VALUE` form.
    pub fn header<S: Into<String>>(mut self, header: S) -> Self {
        self.headers.push(header.into());
        self
    }

    pub fn headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers.extend(headers.into_iter().map(Into::into));
        self
    }

    /// Upper bound for letting open connections complete during shutdown.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = Some(timeout);
        self
    }

    pub fn drain_timeout_option(mut self, timeout: Option<Duration>) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Sets the client used by rewrite rules. Defaults to a hyper client that speaks both
    /// HTTP and HTTPS.
    pub fn upstream_client(mut self, client: Arc<dyn UpstreamClient + Send + Sync>) -> Self {
        self.upstream = Some(client);
        self
    }

    pub fn build(self) -> Result<DefaultStubServer, Error> {
        self.build_with_registry(Arc::new(RuleRegistry::new()))
    }

    /// Builds the server around an existing rule store. Initial rules, if configured, are
    /// applied to `rules` before this returns.
    pub fn build_with_registry<S>(
        self,
        rules: Arc<S>,
    ) -> Result<StubServer<StubHandler<S>>, Error>
    where
        S: RuleStore + Send + Sync + 'static,
    {
        if let Some(path) = &self.rules_file {
            let initial = RuleSet::from_file(path)
                .map_err(|err| Error::RulesFileError(path.clone(), err))?;
            let snapshot = rules.apply_rule_set(initial);
            tracing::info!("loaded {} rule(s) from {}", snapshot.len(), path.display());
        }

        let error_template = match &self.error_template {
            Some(path) => std::fs::read_to_string(path)
                .map_err(|err| Error::ErrorTemplateError(path.clone(), err))?,
            None => DEFAULT_ERROR_TEMPLATE.to_string(),
        };

        let mut default_headers = executor::default_headers();
        for header in &self.headers {
            let (name, value) = parse_header(header)?;
            default_headers.insert(name, value);
        }

        let upstream: Arc<dyn UpstreamClient + Send + Sync> = match self.upstream {
            Some(upstream) => upstream,
            None => Arc::new(HyperUpstreamClient::new()?),
        };

        let executor = ActionExecutor::new(upstream, error_template, default_headers);
        let handler = StubHandler::new(rules, executor);

        Ok(StubServer::new(
            Box::new(handler),
            StubServerConfig {
                port: Some(self.port.unwrap_or(DEFAULT_PORT)),
                expose: self.expose.unwrap_or(false),
                drain_timeout: self.drain_timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT),
                #[cfg(feature = "https")]
                tls: tls::load_server_config(&self.cert_dir.unwrap_or_else(default_cert_dir))?,
            },
        ))
    }
}

/// `cert` next to the running executable, or `./cert` if the executable path is unknown.
pub fn default_cert_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("cert")))
        .unwrap_or_else(|| PathBuf::from("cert"))
}

fn parse_header(header: &str) -> Result<(HeaderName, HeaderValue), Error> {
    let invalid = || Error::InvalidHeader(header.to_string());

    let (name, value) = header.split_once(':').ok_or_else(invalid)?;
    let name = HeaderName::from_str(name.trim()).map_err(|_| invalid())?;
    let value = HeaderValue::from_str(value.trim()).map_err(|_| invalid())?;

    Ok((name, value))
}
