//! Upstream dispatch over Hyper with Rustls.
//!
//! Certificate verification is intentionally disabled: onboarded
//! upstreams are frequently internal services with self-signed
//! certificates, and the gateway terminates no client TLS of its own.
//! The tradeoff is documented at the route-compilation layer; a
//! per-route opt-in is a candidate follow-up.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use eyre::Result;
use hyper::{Request, Response, Version, header};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls::{
    DigitallySignedStruct, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    pki_types::{CertificateDer, ServerName, UnixTime},
};

use crate::ports::{UpstreamClient, UpstreamError, UpstreamResult};

/// Accepts any upstream certificate while keeping the signature schemes
/// of the installed crypto provider so the handshake itself is normal.
#[derive(Debug)]
struct AcceptAnyServerCert {
    schemes: Vec<SignatureScheme>,
}

impl AcceptAnyServerCert {
    fn new() -> Self {
        let provider = rustls::crypto::aws_lc_rs::default_provider();
        Self {
            schemes: provider.signature_verification_algorithms.supported_schemes(),
        }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}

/// Hyper-based client used by the proxy pipeline for all upstreams.
pub struct UpstreamClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl UpstreamClientAdapter {
    pub fn new() -> Result<Self> {
        // Install the default crypto provider if nothing did so yet.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);

        let tls_config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new()))
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, Body>(https_connector);

        tracing::debug!("upstream client created (certificate verification disabled)");
        Ok(Self { client })
    }
}

#[async_trait]
impl UpstreamClient for UpstreamClientAdapter {
    async fn send_request(&self, req: Request<Body>) -> UpstreamResult<Response<Body>> {
        if req.uri().host().is_none() {
            return Err(UpstreamError::InvalidRequest(
                "outgoing URI has no host".to_string(),
            ));
        }

        let method = req.method().clone();
        let uri = req.uri().clone();

        let (mut parts, body) = req.into_parts();
        // Negotiation with the origin starts at HTTP/1.1.
        parts.version = Version::HTTP_11;
        let outgoing = Request::from_parts(parts, body);

        match self.client.request(outgoing).await {
            Ok(response) => {
                let (mut parts, hyper_body) = response.into_parts();
                // The body is re-framed on the way back to the client.
                parts.headers.remove(header::TRANSFER_ENCODING);
                Ok(Response::from_parts(parts, Body::new(hyper_body)))
            }
            Err(e) => {
                tracing::warn!(method = %method, uri = %uri, error = %e, "upstream request failed");
                Err(UpstreamError::Connection(format!(
                    "request to {method} {uri} failed: {e}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_constructs() {
        assert!(UpstreamClientAdapter::new().is_ok());
    }

    #[tokio::test]
    async fn request_without_host_is_rejected() {
        let client = UpstreamClientAdapter::new().unwrap();
        let req = Request::builder()
            .uri("/relative/only")
            .body(Body::empty())
            .unwrap();

        let err = client.send_request(req).await.unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidRequest(_)));
    }
}
