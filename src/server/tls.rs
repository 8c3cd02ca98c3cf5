use async_trait::async_trait;
use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer},
    ServerConfig,
};
use std::{
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;

pub const CERTIFICATE_FILE: &str = "server.cert";
pub const PRIVATE_KEY_FILE: &str = "server.key";

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot read {0}: {1}")]
    ReadError(PathBuf, std::io::Error),
    #[error("no certificate found in {0}")]
    MissingCertificate(PathBuf),
    #[error("no private key found in {0}")]
    MissingPrivateKey(PathBuf),
    #[error("cannot build TLS configuration: {0}")]
    ConfigError(#[from] rustls::Error),
}

/// Builds the TLS configuration from `server.cert` and `server.key` in `cert_dir`.
///
/// Returns `Ok(None)` when either file is missing, in which case the server only speaks
/// plain HTTP.
pub fn load_server_config(cert_dir: &Path) -> Result<Option<Arc<ServerConfig>>, Error> {
    let cert_path = cert_dir.join(CERTIFICATE_FILE);
    let key_path = cert_dir.join(PRIVATE_KEY_FILE);

    if !cert_path.is_file() || !key_path.is_file() {
        tracing::warn!(
            "no TLS material in {} (expected {} and {}), serving plain HTTP only",
            cert_dir.display(),
            CERTIFICATE_FILE,
            PRIVATE_KEY_FILE
        );
        return Ok(None);
    }

    let certificates = load_certificates(&cert_path)?;
    let private_key = load_private_key(&key_path)?;

    let mut config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(certificates, private_key)?;

    config.alpn_protocols = vec![b"http/1.1".to_vec(), b"http/1.0".to_vec()];

    tracing::info!("loaded TLS certificate from {}", cert_path.display());
    Ok(Some(Arc::new(config)))
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
    let file = std::fs::File::open(path).map_err(|err| Error::ReadError(path.to_path_buf(), err))?;
    let mut reader = BufReader::new(file);

    let certificates = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| Error::ReadError(path.to_path_buf(), err))?;

    if certificates.is_empty() {
        return Err(Error::MissingCertificate(path.to_path_buf()));
    }

    Ok(certificates)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, Error> {
    let file = std::fs::File::open(path).map_err(|err| Error::ReadError(path.to_path_buf(), err))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|err| Error::ReadError(path.to_path_buf(), err))?
        .ok_or_else(|| Error::MissingPrivateKey(path.to_path_buf()))
}

/// Exposes the first bytes of a TCP stream to `tls_detect` without consuming them, so the
/// same stream can afterwards be served as either HTTP or HTTPS.
pub struct TcpStreamPeekBuffer<'a> {
    stream: &'a tokio::net::TcpStream,
    buffer: Vec<u8>,
}

impl<'a> TcpStreamPeekBuffer<'a> {
    pub fn new(stream: &'a tokio::net::TcpStream) -> Self {
        TcpStreamPeekBuffer {
            stream,
            buffer: Vec::new(),
        }
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Peeks until the byte at `offset` is available.
    pub async fn advance(&mut self, offset: usize) -> std::io::Result<()> {
        let required_size = offset + 1;
        if self.buffer.len() >= required_size {
            return Ok(());
        }

        let mut peek = vec![0; required_size];
        loop {
            // peek always starts at the beginning of the socket buffer
            let peeked = self.stream.peek(&mut peek).await?;
            if peeked == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before TLS detection completed",
                ));
            }
            if peeked >= required_size {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }

        self.buffer = peek;
        Ok(())
    }
}

#[async_trait]
impl<'a> tls_detect::Read<'a> for TcpStreamPeekBuffer<'a> {
    async fn read_byte(&mut self, from_offset: usize) -> std::io::Result<u8> {
        self.advance(from_offset).await?;
        Ok(self.buffer[from_offset])
    }

    async fn read_bytes(
        &mut self,
        from_offset: usize,
        to_offset: usize,
    ) -> std::io::Result<Vec<u8>> {
        self.advance(to_offset).await?;
        Ok(self.buffer[from_offset..to_offset].to_vec())
    }

    async fn read_u16_from_be(&mut self, offset: usize) -> std::io::Result<u16> {
        let bytes = self.read_bytes(offset, offset + 2).await?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    async fn buffer_to(&mut self, limit: usize) -> std::io::Result<()> {
        self.advance(limit).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_material_means_plain_http() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_server_config(dir.path()).unwrap().is_none());
    }

    #[test]
    fn loads_generated_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        std::fs::write(dir.path().join(CERTIFICATE_FILE), certified.cert.pem()).unwrap();
        std::fs::write(
            dir.path().join(PRIVATE_KEY_FILE),
            certified.key_pair.serialize_pem(),
        )
        .unwrap();

        let config = load_server_config(dir.path()).unwrap();

        assert!(config.is_some());
    }

    #[test]
    fn garbage_certificate_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CERTIFICATE_FILE), "not a certificate").unwrap();
        std::fs::write(dir.path().join(PRIVATE_KEY_FILE), "not a key").unwrap();

        assert!(matches!(
            load_server_config(dir.path()),
            Err(Error::MissingCertificate(_))
        ));
    }
}
