//! TLS upgrade of an established lockdown stream.
//!
//! Devices present a self-signed certificate that only the pair record can
//! vouch for, so the usual WebPKI chain check is replaced by a byte-for-byte
//! comparison with the stored `DeviceCertificate`.

use std::sync::Arc;

use imd_protocol::PairRecord;
use imd_runtime::{BoxedStream, Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, ring};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

/// Name presented in SNI; devices ignore it.
const DEVICE_SERVER_NAME: &str = "lockdown.device";

/// Accepts exactly one server certificate.
#[derive(Debug)]
pub(crate) struct PinnedDeviceCert {
	expected: CertificateDer<'static>,
	provider: Arc<CryptoProvider>,
}

impl PinnedDeviceCert {
	pub(crate) fn new(expected: CertificateDer<'static>, provider: Arc<CryptoProvider>) -> Self {
		Self { expected, provider }
	}
}

impl ServerCertVerifier for PinnedDeviceCert {
	fn verify_server_cert(
		&self,
		end_entity: &CertificateDer<'_>,
		_intermediates: &[CertificateDer<'_>],
		_server_name: &ServerName<'_>,
		_ocsp_response: &[u8],
		_now: UnixTime,
	) -> std::result::Result<ServerCertVerified, rustls::Error> {
		if end_entity.as_ref() != self.expected.as_ref() {
			warn!("device certificate does not match pair record");
			return Err(rustls::Error::General(
				"device certificate does not match pair record".to_string(),
			));
		}
		debug!("device certificate matches pair record");
		Ok(ServerCertVerified::assertion())
	}

	fn verify_tls12_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
		rustls::crypto::verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
	}

	fn verify_tls13_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
		rustls::crypto::verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
	}

	fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
		self.provider
			.signature_verification_algorithms
			.supported_schemes()
	}
}

fn tls_error(context: &str, err: impl std::fmt::Display) -> Error {
	Error::Tls(format!("{context}: {err}"))
}

fn first_certificate(pem: &[u8], what: &str) -> Result<CertificateDer<'static>> {
	rustls_pemfile::certs(&mut &pem[..])
		.next()
		.ok_or_else(|| Error::Tls(format!("{what} holds no certificate")))?
		.map_err(|e| tls_error(what, e))
}

fn client_config(record: &PairRecord) -> Result<rustls::ClientConfig> {
	let provider = Arc::new(ring::default_provider());

	let device_cert = first_certificate(&record.device_certificate, "DeviceCertificate")?;
	let host_certs = rustls_pemfile::certs(&mut &record.host_certificate[..])
		.collect::<std::result::Result<Vec<_>, _>>()
		.map_err(|e| tls_error("HostCertificate", e))?;
	let host_key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut &record.host_private_key[..])
		.map_err(|e| tls_error("HostPrivateKey", e))?
		.ok_or_else(|| Error::Tls("HostPrivateKey holds no key".to_string()))?;

	let verifier = PinnedDeviceCert::new(device_cert, Arc::clone(&provider));
	rustls::ClientConfig::builder_with_provider(provider)
		.with_safe_default_protocol_versions()
		.map_err(|e| tls_error("protocol versions", e))?
		.dangerous()
		.with_custom_certificate_verifier(Arc::new(verifier))
		.with_client_auth_cert(host_certs, host_key)
		.map_err(|e| tls_error("client certificate", e))
}

/// Wraps `stream` in TLS, authenticating with the host identity in `record`.
pub(crate) async fn upgrade(stream: BoxedStream, record: &PairRecord) -> Result<BoxedStream> {
	let config = client_config(record)?;
	let server_name = ServerName::try_from(DEVICE_SERVER_NAME).map_err(|e| tls_error("server name", e))?;

	let connector = TlsConnector::from(Arc::new(config));
	let tls = connector
		.connect(server_name, stream)
		.await
		.map_err(|e| tls_error("handshake", e))?;
	debug!("lockdown stream upgraded to TLS");
	Ok(Box::new(tls))
}
