use clap::Parser;
use httpstub::{
    common::{
        channel::{MessageReader, MessageWriter},
        runtime::{self, shutdown_signal},
    },
    server::{control, LifecycleTracker, RuleRegistry, StubServerBuilder, DEFAULT_PORT},
};
use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};
use tracing_subscriber::EnvFilter;

/// Programmable HTTP/HTTPS stub server. Rules are configured as newline-delimited JSON on
/// stdin and acknowledged on stdout.
#[derive(Parser, Debug)]
#[command(name = "httpstub", version)]
struct Params {
    /// Port to listen on. 0 picks an ephemeral port.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Listen on all interfaces instead of 127.0.0.1.
    #[arg(long, env = "HTTPSTUB_EXPOSE")]
    expose: bool,

    /// Directory containing server.cert and server.key. Defaults to `cert` next to the
    /// executable.
    #[arg(long, env = "HTTPSTUB_CERT_DIR")]
    cert_dir: Option<PathBuf>,

    /// JSON or YAML file with rules to load at startup.
    #[arg(long, env = "HTTPSTUB_RULES")]
    rules: Option<PathBuf>,

    /// XML template for `returnError` rules. `error-code` is replaced with the code.
    #[arg(long, env = "HTTPSTUB_ERROR_TEMPLATE")]
    error_template: Option<PathBuf>,

    /// Additional default response header in NAME:VALUE form. Can be repeated.
    #[arg(long = "header", value_name = "NAME:VALUE")]
    headers: Vec<String>,

    /// How long open connections may take to complete during shutdown.
    #[arg(long, env = "HTTPSTUB_DRAIN_TIMEOUT_MS", default_value_t = 1000)]
    drain_timeout_ms: u64,
}

/// Upper bound on waiting for a stdin read that is still pending at shutdown.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(100);

fn main() -> ExitCode {
    // stdout carries the control channel, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("httpstub=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let params = Params::parse();

    let runtime = match runtime::new(4) {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!("cannot start runtime: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let exit_code = runtime.block_on(serve(params));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    exit_code
}

async fn serve(params: Params) -> ExitCode {
    tracing::info!(
        "starting {} server v{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let registry = Arc::new(RuleRegistry::new());
    let server = match StubServerBuilder::new()
        .port(params.port)
        .expose(params.expose)
        .cert_dir_option(params.cert_dir)
        .rules_file_option(params.rules)
        .error_template_option(params.error_template)
        .headers(params.headers)
        .drain_timeout(Duration::from_millis(params.drain_timeout_ms))
        .build_with_registry(registry.clone())
    {
        Ok(server) => server,
        Err(err) => {
            tracing::error!("cannot configure stub server: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let result = control::run(
        server,
        registry,
        MessageReader::new(tokio::io::stdin()),
        MessageWriter::new(tokio::io::stdout()),
        LifecycleTracker::new(),
        shutdown_signal(),
    )
    .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
