//! SOAP transports and the fallback policy.
//!
//! The primary path is the reqwest/rustls HTTP client. Some authority
//! deployments intermittently reject well-formed SOAP 1.2 posts from it
//! (resets, empty bodies, or a fault complaining about a parser
//! START_ELEMENT); the recovery that works in the field is re-posting a
//! hand-built envelope over a raw connection, first as SOAP 1.2 and then
//! as SOAP 1.1. [`FallbackPolicy`] drives that matrix sequentially with a
//! fixed delay: the same signed document must never be in flight twice,
//! because resubmission is not idempotent at the authority.

use std::future::Future;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode, SslVersion};
use url::Url;

use crate::certificate::CertificateMaterial;
use crate::config::{SefazClientConfig, TrustAnchors};
use crate::error::{Result, SefazError};

/// SOAP protocol version of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoapVersion {
    /// SOAP 1.2: `application/soap+xml` with an `action` parameter.
    V12,
    /// SOAP 1.1: `text/xml` with a `SOAPAction` header.
    V11,
}

/// One SOAP call, independent of the transport that carries it.
#[derive(Debug, Clone)]
pub struct SoapRequest {
    /// Target service URL.
    pub url: Url,
    /// Full action URI for the operation.
    pub action: String,
    /// WSDL namespace wrapping the payload.
    pub service_ns: String,
    /// Inner payload XML (no prolog).
    pub payload: String,
    /// Protocol version.
    pub version: SoapVersion,
}

impl SoapRequest {
    /// The same request under a different SOAP version.
    pub fn with_version(&self, version: SoapVersion) -> Self {
        Self {
            version,
            ..self.clone()
        }
    }

    /// Render the full envelope.
    pub fn envelope(&self) -> String {
        match self.version {
            SoapVersion::V12 => format!(
                concat!(
                    "<?xml version=\"1.0\" encoding=\"utf-8\"?>",
                    "<soap12:Envelope xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" ",
                    "xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\" ",
                    "xmlns:soap12=\"http://www.w3.org/2003/05/soap-envelope\">",
                    "<soap12:Body><nfeDadosMsg xmlns=\"{ns}\">{payload}</nfeDadosMsg></soap12:Body>",
                    "</soap12:Envelope>"
                ),
                ns = self.service_ns,
                payload = self.payload,
            ),
            SoapVersion::V11 => format!(
                concat!(
                    "<?xml version=\"1.0\" encoding=\"utf-8\"?>",
                    "<soapenv:Envelope xmlns:soapenv=\"http://schemas.xmlsoap.org/soap/envelope/\">",
                    "<soapenv:Body><nfeDadosMsg xmlns=\"{ns}\">{payload}</nfeDadosMsg></soapenv:Body>",
                    "</soapenv:Envelope>"
                ),
                ns = self.service_ns,
                payload = self.payload,
            ),
        }
    }

    /// Content-Type for the envelope.
    pub fn content_type(&self) -> String {
        match self.version {
            SoapVersion::V12 => format!(
                "application/soap+xml; charset=utf-8; action=\"{}\"",
                self.action
            ),
            SoapVersion::V11 => "text/xml; charset=utf-8".to_owned(),
        }
    }
}

/// Boxed future used by the object-safe transport trait.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A way to carry one SOAP request to the authority.
pub trait Transport: Send + Sync {
    /// Send the request and return the raw response body.
    fn send<'a>(&'a self, request: &'a SoapRequest) -> BoxFuture<'a, Result<String>>;
}

/// Build the reqwest client used by the primary transport.
pub fn build_http_client(
    config: &SefazClientConfig,
    material: Option<&CertificateMaterial>,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.timeout)
        .user_agent(crate::USER_AGENT)
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .use_rustls_tls();

    match &config.trust_anchors {
        TrustAnchors::WebPki => {
            builder = builder.tls_built_in_root_certs(true);
        }
        TrustAnchors::Explicit(ca_certs) => {
            builder = builder.tls_built_in_root_certs(false);
            for ca_pem in ca_certs {
                validate_ca_pem(ca_pem)?;
                let cert = reqwest::Certificate::from_pem(ca_pem)
                    .map_err(|e| SefazError::tls(format!("failed to parse CA certificate: {}", e)))?;
                builder = builder.add_root_certificate(cert);
            }
        }
        TrustAnchors::InsecureAcceptAny => {
            builder = builder
                .tls_built_in_root_certs(false)
                .danger_accept_invalid_certs(true);
        }
    }

    if let Some(material) = material {
        let (cert_pem, key_pem) = material.identity_pem()?;
        let mut pem = cert_pem;
        pem.push(b'\n');
        pem.extend_from_slice(&key_pem);
        let identity = reqwest::Identity::from_pem(&pem)
            .map_err(|e| SefazError::tls(format!("failed to build client identity: {}", e)))?;
        builder = builder.identity(identity);
    }

    builder
        .build()
        .map_err(|e| SefazError::tls(format!("failed to build HTTP client: {}", e)))
}

/// Check that a PEM buffer actually carries at least one certificate;
/// reqwest accepts empty buffers silently, which would leave the client
/// with no trust anchors at all.
fn validate_ca_pem(pem: &[u8]) -> Result<usize> {
    let mut reader = std::io::BufReader::new(pem);
    let count = rustls_pemfile::certs(&mut reader)
        .filter(|item| item.is_ok())
        .count();
    if count == 0 {
        return Err(SefazError::tls("no certificates found in CA PEM data"));
    }
    Ok(count)
}

/// Primary transport: reqwest over rustls.
pub struct HttpSoapTransport {
    http: reqwest::Client,
}

impl HttpSoapTransport {
    /// Wrap an already-configured client.
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn send_inner(&self, request: &SoapRequest) -> Result<String> {
        tracing::debug!(url = %request.url, action = %request.action, "POST (primary)");

        let mut builder = self
            .http
            .post(request.url.clone())
            .header(reqwest::header::CONTENT_TYPE, request.content_type())
            .body(request.envelope());
        if request.version == SoapVersion::V11 {
            builder = builder.header("SOAPAction", format!("\"{}\"", request.action));
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() && body.trim().is_empty() {
            return Err(SefazError::transient(format!(
                "HTTP {} with empty body from {}",
                status, request.url
            )));
        }
        Ok(body)
    }
}

impl Transport for HttpSoapTransport {
    fn send<'a>(&'a self, request: &'a SoapRequest) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.send_inner(request))
    }
}

/// Fallback transport: a hand-built HTTP/1.1 POST over a raw socket,
/// TLS-wrapped by openssl when the URL is https.
///
/// Runs on the blocking pool; a timed-out call drops the socket instead
/// of leaving it dangling.
pub struct RawSoapTransport {
    material: Option<Arc<CertificateMaterial>>,
    timeout: Duration,
    insecure: bool,
}

impl RawSoapTransport {
    /// Create the fallback transport.
    pub fn new(
        material: Option<Arc<CertificateMaterial>>,
        timeout: Duration,
        insecure: bool,
    ) -> Self {
        Self {
            material,
            timeout,
            insecure,
        }
    }

    fn send_blocking(
        material: Option<Arc<CertificateMaterial>>,
        timeout: Duration,
        insecure: bool,
        request: SoapRequest,
    ) -> Result<String> {
        let host = request
            .url
            .host_str()
            .ok_or_else(|| SefazError::transient("URL has no host"))?
            .to_owned();
        let port = request.url.port_or_known_default().unwrap_or(443);

        let addr = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| SefazError::transient(format!("DNS resolution failed: {}", e)))?
            .next()
            .ok_or_else(|| SefazError::transient(format!("no address for {}", host)))?;

        let stream = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| SefazError::transient(format!("connect to {} failed: {}", addr, e)))?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| SefazError::transient(e.to_string()))?;
        stream
            .set_write_timeout(Some(timeout))
            .map_err(|e| SefazError::transient(e.to_string()))?;

        let envelope = request.envelope();
        let mut path = request.url.path().to_owned();
        if let Some(query) = request.url.query() {
            path.push('?');
            path.push_str(query);
        }
        let mut head = format!(
            "POST {} HTTP/1.1\r\nHost: {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nUser-Agent: {}\r\nConnection: close\r\n",
            path,
            host,
            request.content_type(),
            envelope.len(),
            crate::USER_AGENT,
        );
        if request.version == SoapVersion::V11 {
            head.push_str(&format!("SOAPAction: \"{}\"\r\n", request.action));
        }
        head.push_str("\r\n");

        let mut raw = Vec::new();
        if request.url.scheme() == "https" {
            let mut builder = SslConnector::builder(SslMethod::tls_client())
                .map_err(|e| SefazError::tls(format!("TLS connector: {}", e)))?;
            builder
                .set_min_proto_version(Some(SslVersion::TLS1_2))
                .map_err(|e| SefazError::tls(e.to_string()))?;
            // Older authority gateways still negotiate cipher suites that
            // default OpenSSL policy refuses at security level 2.
            builder
                .set_cipher_list("DEFAULT@SECLEVEL=1")
                .map_err(|e| SefazError::tls(e.to_string()))?;
            if let Some(material) = &material {
                builder
                    .set_certificate(&material.certificate)
                    .map_err(|e| SefazError::tls(format!("client certificate: {}", e)))?;
                builder
                    .set_private_key(&material.private_key)
                    .map_err(|e| SefazError::tls(format!("client key: {}", e)))?;
                for ca in &material.chain {
                    builder
                        .add_extra_chain_cert(ca.clone())
                        .map_err(|e| SefazError::tls(e.to_string()))?;
                }
            }
            let connector = builder.build();
            let mut configuration = connector
                .configure()
                .map_err(|e| SefazError::tls(e.to_string()))?;
            if insecure {
                configuration.set_verify(SslVerifyMode::NONE);
                configuration.set_verify_hostname(false);
            }
            let mut tls = configuration
                .connect(&host, stream)
                .map_err(|e| SefazError::transient(format!("TLS handshake failed: {}", e)))?;
            tls.write_all(head.as_bytes())
                .and_then(|_| tls.write_all(envelope.as_bytes()))
                .map_err(|e| SefazError::transient(format!("write failed: {}", e)))?;
            tls.read_to_end(&mut raw)
                .map_err(|e| SefazError::transient(format!("read failed: {}", e)))?;
        } else {
            let mut plain = stream;
            plain
                .write_all(head.as_bytes())
                .and_then(|_| plain.write_all(envelope.as_bytes()))
                .map_err(|e| SefazError::transient(format!("write failed: {}", e)))?;
            plain
                .read_to_end(&mut raw)
                .map_err(|e| SefazError::transient(format!("read failed: {}", e)))?;
        }

        parse_http_response(&raw)
    }
}

impl Transport for RawSoapTransport {
    fn send<'a>(&'a self, request: &'a SoapRequest) -> BoxFuture<'a, Result<String>> {
        let material = self.material.clone();
        let timeout = self.timeout;
        let insecure = self.insecure;
        let request = request.clone();
        Box::pin(async move {
            tracing::debug!(url = %request.url, version = ?request.version, "POST (raw fallback)");
            tokio::task::spawn_blocking(move || {
                Self::send_blocking(material, timeout, insecure, request)
            })
            .await
            .map_err(|e| SefazError::transient(format!("fallback task failed: {}", e)))?
        })
    }
}

/// Split a raw HTTP/1.1 response into status and body, decoding chunked
/// transfer encoding.
fn parse_http_response(raw: &[u8]) -> Result<String> {
    let text = String::from_utf8_lossy(raw).into_owned();
    let Some(head_end) = text.find("\r\n\r\n") else {
        return Err(SefazError::transient("truncated HTTP response"));
    };
    let head = &text[..head_end];
    let body = &text[head_end + 4..];

    let chunked = head
        .lines()
        .any(|l| l.to_ascii_lowercase().starts_with("transfer-encoding") && l.to_ascii_lowercase().contains("chunked"));

    let body = if chunked {
        decode_chunked(body)?
    } else {
        body.to_owned()
    };

    let status: u16 = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    if status >= 400 && body.trim().is_empty() {
        return Err(SefazError::transient(format!(
            "HTTP {} with empty body on raw fallback",
            status
        )));
    }

    Ok(body)
}

fn decode_chunked(body: &str) -> Result<String> {
    let mut out = String::new();
    let mut rest = body;
    loop {
        let Some(line_end) = rest.find("\r\n") else {
            break;
        };
        let size = usize::from_str_radix(rest[..line_end].trim(), 16)
            .map_err(|_| SefazError::transient("malformed chunked encoding"))?;
        if size == 0 {
            break;
        }
        let chunk_start = line_end + 2;
        let chunk = rest
            .get(chunk_start..chunk_start + size)
            .ok_or_else(|| SefazError::transient("truncated chunk"))?;
        out.push_str(chunk);
        rest = rest[chunk_start + size..].trim_start_matches("\r\n");
    }
    Ok(out)
}

/// Whether a response body that arrived without a transport error still
/// requires entering the fallback chain.
///
/// An empty body means the gateway swallowed the request. The
/// START_ELEMENT test matches the fault text one server-side XML parser
/// produces when it truncates the envelope; it is a compatibility
/// heuristic tied to that parser's phrasing, preserved from field
/// behavior rather than mandated by the authority.
pub fn needs_fallback(body: &str) -> bool {
    if body.trim().is_empty() {
        return true;
    }
    (body.contains("Fault") || body.contains("fault")) && body.contains("START_ELEMENT")
}

/// Sequencing of the primary call and the fallback matrix.
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    /// Attempts per SOAP version on the fallback transport.
    pub attempts_per_version: u32,
    /// Fixed delay before each fallback attempt.
    pub delay: Duration,
}

impl FallbackPolicy {
    /// Build the policy from the client configuration.
    pub fn from_config(config: &SefazClientConfig) -> Self {
        Self {
            attempts_per_version: config.attempts_per_version,
            delay: config.retry_delay,
        }
    }

    /// Run the primary transport, entering the fallback matrix
    /// (SOAP 1.2 ×N, then SOAP 1.1 ×N) on transient failure or on a body
    /// that [`needs_fallback`]. Attempts run sequentially; the last
    /// observed error surfaces once the matrix is exhausted.
    pub async fn execute(
        &self,
        primary: &dyn Transport,
        fallback: &dyn Transport,
        request: &SoapRequest,
    ) -> Result<String> {
        let mut last_error = match primary.send(request).await {
            Ok(body) if !needs_fallback(&body) => return Ok(body),
            Ok(body) => {
                tracing::warn!(
                    url = %request.url,
                    "primary response requires fallback (empty or parser fault)"
                );
                SefazError::transient(if body.trim().is_empty() {
                    "empty response body".to_owned()
                } else {
                    "SOAP fault mentioning START_ELEMENT".to_owned()
                })
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(url = %request.url, error = %e, "primary transport failed");
                e
            }
            Err(e) => return Err(e),
        };

        for version in [SoapVersion::V12, SoapVersion::V11] {
            let versioned = request.with_version(version);
            for attempt in 1..=self.attempts_per_version {
                tokio::time::sleep(self.delay).await;
                tracing::debug!(?version, attempt, "fallback attempt");
                match fallback.send(&versioned).await {
                    Ok(body) if !needs_fallback(&body) => return Ok(body),
                    Ok(_) => {
                        last_error = SefazError::transient("fallback response empty or faulted")
                    }
                    Err(e) if e.is_transient() => last_error = e,
                    Err(e) => return Err(e),
                }
            }
        }

        Err(last_error)
    }
}
