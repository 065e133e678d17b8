//! TLS context construction (§4.2) for both the client side (optional
//! certificate verification) and the server side (optional mutual auth).

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::error::{Error, Result};

/// Client-side verification mode: the default full verification, no
/// verification at all, or verification against a specific CA file/directory.
#[derive(Debug, Clone)]
pub enum ClientVerify {
    Verify,
    Ignore,
    Ca(std::path::PathBuf),
}

impl Default for ClientVerify {
    fn default() -> Self {
        ClientVerify::Verify
    }
}

/// Builds a client [`rustls::ClientConfig`] per §4.2's TLS rules.
pub fn create_client_tls_context(
    verify: &ClientVerify,
    client_cert: Option<(&Path, Option<&Path>, Option<&str>)>,
) -> Result<ClientConfig> {
    if let ClientVerify::Ignore = verify {
        let builder = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier));
        return Ok(finish_client_config(builder, client_cert)?);
    }

    let mut roots = RootCertStore::empty();
    match verify {
        ClientVerify::Verify => {
            for cert in
                rustls_native_certs::load_native_certs().expect("failed to load native certs")
            {
                let _ = roots.add(cert);
            }
        }
        ClientVerify::Ca(path) => load_ca_into(path, &mut roots)?,
        ClientVerify::Ignore => unreachable!(),
    }

    let builder = ClientConfig::builder().with_root_certificates(roots);
    finish_client_config(builder, client_cert)
}

fn finish_client_config(
    builder: rustls::ConfigBuilder<ClientConfig, rustls::client::WantsClientCert>,
    client_cert: Option<(&Path, Option<&Path>, Option<&str>)>,
) -> Result<ClientConfig> {
    if let Some((certfile, keyfile, _password)) = client_cert {
        let certs = load_certs(certfile)?;
        let key = load_key(keyfile.unwrap_or(certfile))?;
        builder
            .with_client_auth_cert(certs, key)
            .map_err(|e| Error::TlsError(e.to_string()))
    } else {
        Ok(builder.with_no_client_auth())
    }
}

fn load_ca_into(path: &Path, roots: &mut RootCertStore) -> Result<()> {
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            if entry.path().extension().map(|e| e == "pem").unwrap_or(false) {
                for cert in load_certs(&entry.path())? {
                    let _ = roots.add(cert);
                }
            }
        }
    } else if path.exists() {
        for cert in load_certs(path)? {
            let _ = roots.add(cert);
        }
    } else {
        return Err(Error::ConfigError(
            path.display().to_string(),
            "verify location path does not exist".into(),
        ));
    }
    Ok(())
}

/// Builds a server [`rustls::ServerConfig`] from `certfile`/`keyfile`;
/// `client_ca` gates mutual TLS when set.
pub fn create_server_tls_context(
    certfile: &Path,
    keyfile: Option<&Path>,
    client_ca: Option<&Path>,
) -> Result<ServerConfig> {
    let certs = load_certs(certfile)?;
    let key = load_key(keyfile.unwrap_or(certfile))?;

    let builder = ServerConfig::builder();

    let config = if let Some(ca_path) = client_ca {
        let mut roots = RootCertStore::empty();
        load_ca_into(ca_path, &mut roots)?;
        let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| Error::TlsError(e.to_string()))?;
        builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)
            .map_err(|e| Error::TlsError(e.to_string()))?
    } else {
        builder
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::TlsError(e.to_string()))?
    };

    Ok(config)
}

pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string()).map_err(|e| Error::TlsError(e.to_string()))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::Io)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| Error::TlsError(format!("no private key found in {}", path.display())))
}

#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySigned,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureVerified, rustls::Error>
    {
        Ok(rustls::client::danger::HandshakeSignatureVerified::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySigned,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureVerified, rustls::Error>
    {
        Ok(rustls::client::danger::HandshakeSignatureVerified::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
