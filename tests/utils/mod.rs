use httpstub::api::{Driver, DriverConfig};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// A driver for the stub server binary built alongside these tests. Every stub picks an
/// ephemeral port and looks for TLS material in `cert_dir`.
pub fn driver(cert_dir: &Path) -> Driver {
    Driver::new(
        DriverConfig::new(env!("CARGO_BIN_EXE_httpstub"))
            .port(0)
            .cert_dir(cert_dir)
            .ack_timeout(Duration::from_secs(10))
            .env("RUST_LOG", "httpstub=debug"),
    )
}

pub fn fixture(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Writes a self-signed certificate for `localhost` as `server.cert` / `server.key`.
pub fn write_certificate(dir: &Path) {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    fixture(dir, "server.cert", &certified.cert.pem());
    fixture(dir, "server.key", &certified.key_pair.serialize_pem());
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .no_proxy()
        .build()
        .unwrap()
}
