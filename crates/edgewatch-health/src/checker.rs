//! Single-attempt HTTP(S) probe of one node address.
//!
//! Each probe dials the node's IP directly on a fresh connection, so the
//! result never depends on DNS or on a pooled connection to another node.
//! Certificates are not verified: edge nodes answer for customer domains and
//! are routinely probed by bare IP.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONNECTION, HOST, USER_AGENT};
use http::{Request, Uri};
use http_body_util::Empty;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::{HealthError, HealthResult};
use crate::policy::{EffectivePolicy, HEALTH_CHECK_HEADER, HOST_PLACEHOLDER};

/// Outcome of one probe attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub passed: bool,
    /// Why the attempt failed; `None` when it passed.
    pub reason: Option<String>,
}

impl ProbeOutcome {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Performs one probe attempt against an address.
///
/// Implementations must never panic or return early on network errors;
/// every failure is reported as a failed [`ProbeOutcome`].
pub trait Prober: Send + Sync + 'static {
    fn probe(
        &self,
        ip: &str,
        policy: &EffectivePolicy,
    ) -> impl Future<Output = ProbeOutcome> + Send;
}

/// Substitute the probed address into a URL template.
///
/// IPv6 literals are bracketed so the result stays a valid URL.
pub fn build_probe_url(template: &str, ip: &str) -> String {
    let host = if ip.contains(':') && !ip.starts_with('[') {
        format!("[{ip}]")
    } else {
        ip.to_string()
    };
    template.replace(HOST_PLACEHOLDER, &host)
}

/// Production prober speaking HTTP/1.1 over plain TCP or TLS.
#[derive(Clone)]
pub struct HttpProber {
    tls: TlsConnector,
}

impl HttpProber {
    pub fn new() -> HealthResult<Self> {
        let config = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()
        .map_err(|e| HealthError::Tls(format!("tls protocol version error: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(danger::NoVerifier))
        .with_no_client_auth();

        Ok(Self {
            tls: TlsConnector::from(Arc::new(config)),
        })
    }

    /// Send one request and return the response status code.
    async fn request(&self, ip: &str, policy: &EffectivePolicy) -> Result<u16, String> {
        let url = build_probe_url(&policy.url_template, ip);
        let uri: Uri = url
            .parse()
            .map_err(|e| format!("invalid probe url '{url}': {e}"))?;

        let https = match uri.scheme_str() {
            Some("http") => false,
            Some("https") => true,
            other => {
                return Err(format!(
                    "unsupported url scheme '{}'",
                    other.unwrap_or_default()
                ));
            }
        };
        let authority = uri
            .authority()
            .ok_or_else(|| format!("probe url '{url}' has no host"))?
            .clone();
        let port = authority.port_u16().unwrap_or(if https { 443 } else { 80 });
        let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

        let request = Request::builder()
            .method(policy.method.clone())
            .uri(path)
            .header(HOST, authority.as_str())
            .header(USER_AGENT, policy.user_agent.as_str())
            .header(HEALTH_CHECK_HEADER, policy.marker.as_str())
            .header(CONNECTION, "close")
            .body(Empty::<Bytes>::new())
            .map_err(|e| format!("invalid probe request: {e}"))?;

        let dial_ip = unbracket(ip);
        let stream = TcpStream::connect((dial_ip, port))
            .await
            .map_err(|e| format!("connect to {dial_ip}:{port} failed: {e}"))?;

        if https {
            let server_name = ServerName::try_from(unbracket(authority.host()).to_string())
                .map_err(|e| format!("invalid tls server name: {e}"))?;
            let stream = self
                .tls
                .connect(server_name, stream)
                .await
                .map_err(|e| format!("tls handshake failed: {e}"))?;
            send(stream, request).await
        } else {
            send(stream, request).await
        }
    }
}

impl Prober for HttpProber {
    async fn probe(&self, ip: &str, policy: &EffectivePolicy) -> ProbeOutcome {
        match tokio::time::timeout(policy.timeout, self.request(ip, policy)).await {
            Ok(Ok(status)) if policy.accepts(status) => ProbeOutcome::pass(),
            Ok(Ok(status)) => {
                debug!(%ip, status, "health probe rejected status");
                ProbeOutcome::fail(format!("invalid response status code '{status}'"))
            }
            Ok(Err(reason)) => {
                debug!(%ip, %reason, "health probe failed");
                ProbeOutcome::fail(reason)
            }
            Err(_) => {
                debug!(%ip, "health probe timed out");
                ProbeOutcome::fail(format!(
                    "request timed out after {}ms",
                    policy.timeout.as_millis()
                ))
            }
        }
    }
}

async fn send<S>(io: S, request: Request<Empty<Bytes>>) -> Result<u16, String>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .map_err(|e| format!("http handshake failed: {e}"))?;

    let driver = tokio::spawn(async move {
        let _ = conn.await;
    });
    let result = sender.send_request(request).await;
    // The body is never read; tear the connection down with the response.
    driver.abort();

    result
        .map(|response| response.status().as_u16())
        .map_err(|e| format!("request failed: {e}"))
}

fn unbracket(host: &str) -> &str {
    host.trim_start_matches('[').trim_end_matches(']')
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use edgewatch_state::HealthCheckPolicy;

    use super::*;

    /// Accept one connection, answer with `response`, return the raw request.
    async fn serve_once(response: &'static str) -> (u16, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });
        (port, handle)
    }

    fn policy_for(port: u16, status_codes: Vec<u16>) -> EffectivePolicy {
        EffectivePolicy::from_policy(&HealthCheckPolicy {
            url: format!("http://${{host}}:{port}/healthz?full=1"),
            status_codes,
            timeout_ms: Some(2000),
            ..HealthCheckPolicy::default()
        })
        .unwrap()
    }

    #[test]
    fn url_substitutes_ipv4() {
        assert_eq!(
            build_probe_url("http://${host}/", "10.0.0.1"),
            "http://10.0.0.1/"
        );
    }

    #[test]
    fn url_brackets_ipv6() {
        assert_eq!(
            build_probe_url("https://${host}:8443/check", "2001:db8::1"),
            "https://[2001:db8::1]:8443/check"
        );
        assert_eq!(
            build_probe_url("http://${host}/", "[::1]"),
            "http://[::1]/"
        );
    }

    #[tokio::test]
    async fn accepted_status_passes() {
        let (port, server) = serve_once("HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n").await;
        let prober = HttpProber::new().unwrap();

        let outcome = prober.probe("127.0.0.1", &policy_for(port, vec![200])).await;
        assert_eq!(outcome, ProbeOutcome::pass());

        let raw = server.await.unwrap().to_ascii_lowercase();
        assert!(raw.starts_with("get /healthz?full=1 http/1.1"));
        assert!(raw.contains(&format!("host: 127.0.0.1:{port}")));
        assert!(raw.contains("x-edge-health-check-key: "));
        assert!(raw.contains("user-agent: mozilla/5.0"));
    }

    #[tokio::test]
    async fn rejected_status_reports_code() {
        let (port, _server) =
            serve_once("HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\n\r\n").await;
        let prober = HttpProber::new().unwrap();

        let outcome = prober.probe("127.0.0.1", &policy_for(port, vec![200])).await;
        assert!(!outcome.passed);
        assert_eq!(
            outcome.reason.as_deref(),
            Some("invalid response status code '503'")
        );
    }

    #[tokio::test]
    async fn empty_status_set_accepts_any_response() {
        let (port, _server) =
            serve_once("HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n").await;
        let prober = HttpProber::new().unwrap();

        let outcome = prober.probe("127.0.0.1", &policy_for(port, vec![])).await;
        assert!(outcome.passed);
    }

    #[tokio::test]
    async fn refused_connection_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let prober = HttpProber::new().unwrap();

        let outcome = prober.probe("127.0.0.1", &policy_for(port, vec![])).await;
        assert!(!outcome.passed);
        assert!(outcome.reason.unwrap().contains("connect to 127.0.0.1"));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let mut policy = policy_for(port, vec![]);
        policy.timeout = Duration::from_millis(200);
        let outcome = HttpProber::new().unwrap().probe("127.0.0.1", &policy).await;
        assert!(!outcome.passed);
        assert_eq!(
            outcome.reason.as_deref(),
            Some("request timed out after 200ms")
        );
    }

    #[tokio::test]
    async fn unsupported_scheme_fails_without_dialing() {
        let policy = EffectivePolicy::from_policy(&HealthCheckPolicy {
            url: "ftp://${host}/".to_string(),
            ..HealthCheckPolicy::default()
        })
        .unwrap();
        let outcome = HttpProber::new().unwrap().probe("127.0.0.1", &policy).await;
        assert_eq!(
            outcome.reason.as_deref(),
            Some("unsupported url scheme 'ftp'")
        );
    }
}
