//! The unified transport client: one `Exchange` operation across
//! Do53/DoT/DoH/DoQ (`spec.md` §4.1).
//!
//! Grounded on the `domain::net::client` usage in the teacher's
//! `loader/server.rs` (`ixfr`/`axfr`/`query_soa`): a `Do53` client is a
//! `client::dgram_stream::Connection` built from a `UdpConnect`/`TcpConnect`
//! pair, which already implements the UDP-then-TCP-on-truncation fallback
//! this spec asks for, so this module delegates to it rather than
//! hand-rolling the retry. DoT reuses the same `client::stream::Connection`
//! machinery over a `tokio_rustls` TLS stream. DoH and DoQ have no
//! equivalent in `domain::net::client` and are built directly on `reqwest`
//! and `quinn` respectively, per `SPEC_FULL.md` §4.1.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use domain::base::Message;
use domain::net::client::protocol::{TcpConnect, UdpConnect};
use domain::net::client::request::{RequestMessage, RequestMessageMulti, SendRequest};
use domain::net::client::{dgram_stream, stream};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::Transport;

/// The failure taxonomy from `spec.md` §4.1: every exchange failure surfaces
/// to the caller unmodified, there is no internal retry here.
#[derive(Debug)]
pub enum TransportError {
    /// A network-layer failure: connection refused, unreachable, reset.
    Network(String),
    /// The response could not be parsed as a DNS message.
    Protocol(String),
    /// An HTTP- or TLS-layer failure (DoH status code, handshake failure).
    Tls(String),
    /// The exchange did not complete within the configured timeout.
    Timeout,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "network error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Tls(msg) => write!(f, "tls/http error: {msg}"),
            Self::Timeout => write!(f, "exchange timed out"),
        }
    }
}

impl std::error::Error for TransportError {}

/// TLS configuration shared by DoT, DoH and DoQ.
///
/// `spec.md` §4.1/§5 names "InsecureSkipVerify default" for DoT opportunistic
/// use; `verify` lets a caller opt into certificate validation once
/// `ConnMode` has been promoted past `Opportunistic` (`spec.md` §4.4).
#[derive(Clone)]
pub struct TlsConfig {
    pub server_name: Option<String>,
    pub verify: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self { server_name: None, verify: false }
    }
}

/// Construction-time flags from `spec.md` §4.1.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClientOptions {
    pub disable_fallback: bool,
    pub force_tcp: bool,
}

/// A transport-specific client. Per `spec.md` §4.1, callers hold one per
/// transport and multiplex themselves; a `Client` never switches transports
/// internally.
pub struct Client {
    transport: Transport,
    port: u16,
    tls: TlsConfig,
    options: ClientOptions,
    timeout: Duration,
    doh_client: Option<reqwest::Client>,
}

impl Client {
    pub fn new(transport: Transport, port: u16, tls: TlsConfig, options: ClientOptions, timeout: Duration) -> Self {
        let doh_client = match transport {
            Transport::Doh => Some(build_doh_client(&tls, timeout)),
            _ => None,
        };
        Self { transport, port, tls, options, timeout, doh_client }
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// `Exchange(message, server_ip, debug) -> (response, rtt, error)`
    /// (`spec.md` §4.1).
    pub async fn exchange(
        &self,
        message: &Message<Bytes>,
        server_ip: IpAddr,
        debug: bool,
    ) -> (Option<Message<Bytes>>, Duration, Option<TransportError>) {
        let addr = SocketAddr::new(server_ip, self.port);
        let start = Instant::now();

        let result = match self.transport {
            Transport::Do53 => self.exchange_do53(message, addr).await,
            Transport::Dot => self.exchange_dot(message, addr).await,
            Transport::Doh => self.exchange_doh(message, addr).await,
            Transport::Doq => self.exchange_doq(message, addr).await,
        };

        let rtt = start.elapsed();
        if debug {
            match &result {
                Ok(_) => tracing::debug!(transport = %self.transport, %addr, ?rtt, "exchange succeeded"),
                Err(err) => tracing::debug!(transport = %self.transport, %addr, ?rtt, %err, "exchange failed"),
            }
        }

        match result {
            Ok(response) => (Some(response), rtt, None),
            Err(err) => (None, rtt, Some(err)),
        }
    }

    async fn exchange_do53(&self, message: &Message<Bytes>, addr: SocketAddr) -> Result<Message<Bytes>, TransportError> {
        let request = RequestMessage::new(message.clone()).map_err(|e| TransportError::Protocol(e.to_string()))?;

        let fut = async {
            if self.options.force_tcp {
                let tcp_stream = tokio::net::TcpStream::connect(addr).await.map_err(|e| TransportError::Network(e.to_string()))?;
                let (client, transport) = stream::Connection::<RequestMessage<Bytes>, RequestMessageMulti<Bytes>>::new(tcp_stream);
                tokio::task::spawn(transport.run());
                client
                    .send_request(request)
                    .get_response()
                    .await
                    .map_err(|e| TransportError::Network(e.to_string()))
            } else {
                let udp_conn = UdpConnect::new(addr);
                let tcp_conn = TcpConnect::new(addr);
                let (client, transport) = dgram_stream::Connection::new(udp_conn, tcp_conn);
                tokio::task::spawn(transport.run());
                client
                    .send_request(request)
                    .get_response()
                    .await
                    .map_err(|e| TransportError::Network(e.to_string()))
            }
        };

        tokio::time::timeout(self.timeout, fut).await.map_err(|_| TransportError::Timeout)?
    }

    async fn exchange_dot(&self, message: &Message<Bytes>, addr: SocketAddr) -> Result<Message<Bytes>, TransportError> {
        let request = RequestMessage::new(message.clone()).map_err(|e| TransportError::Protocol(e.to_string()))?;

        let fut = async {
            let tls_stream = connect_tls(addr, &self.tls).await?;
            let (client, transport) = stream::Connection::<RequestMessage<Bytes>, RequestMessageMulti<Bytes>>::new(tls_stream);
            tokio::task::spawn(transport.run());
            client
                .send_request(request)
                .get_response()
                .await
                .map_err(|e| TransportError::Network(e.to_string()))
        };

        tokio::time::timeout(self.timeout, fut).await.map_err(|_| TransportError::Timeout)?
    }

    async fn exchange_doh(&self, message: &Message<Bytes>, addr: SocketAddr) -> Result<Message<Bytes>, TransportError> {
        let http_client = self.doh_client.as_ref().expect("DoH client built at construction");
        let body = message.as_slice().to_vec();
        let host = self.tls.server_name.clone().unwrap_or_else(|| addr.ip().to_string());
        let url = format!("https://{host}:{port}/dns-query", port = addr.port());

        let fut = async {
            let response = http_client
                .post(&url)
                .header("content-type", "application/dns-message")
                .body(body)
                .send()
                .await
                .map_err(|e| TransportError::Tls(e.to_string()))?;

            if response.status() != reqwest::StatusCode::OK {
                return Err(TransportError::Tls(format!("DoH status {}", response.status())));
            }

            let bytes = response.bytes().await.map_err(|e| TransportError::Network(e.to_string()))?;
            Message::from_octets(Bytes::copy_from_slice(&bytes)).map_err(|e| TransportError::Protocol(e.to_string()))
        };

        tokio::time::timeout(self.timeout, fut).await.map_err(|_| TransportError::Timeout)?
    }

    async fn exchange_doq(&self, message: &Message<Bytes>, addr: SocketAddr) -> Result<Message<Bytes>, TransportError> {
        let fut = async {
            let connection = connect_quic(addr, &self.tls).await?;

            let (mut send, mut recv) =
                connection.open_bi().await.map_err(|e| TransportError::Network(e.to_string()))?;

            // RFC 9250 §4.2.1: DoQ queries over a bidirectional stream always
            // use DNS message ID 0.
            let wire = message.as_slice();
            let len = u16::try_from(wire.len()).map_err(|_| TransportError::Protocol("message too large for DoQ".into()))?;
            send.write_all(&len.to_be_bytes()).await.map_err(|e| TransportError::Network(e.to_string()))?;
            send.write_all(wire).await.map_err(|e| TransportError::Network(e.to_string()))?;
            send.finish().map_err(|e| TransportError::Network(e.to_string()))?;

            let mut len_buf = [0u8; 2];
            recv.read_exact(&mut len_buf).await.map_err(|e| TransportError::Network(e.to_string()))?;
            let resp_len = u16::from_be_bytes(len_buf) as usize;

            let mut buf = vec![0u8; resp_len];
            recv.read_exact(&mut buf).await.map_err(|e| TransportError::Network(e.to_string()))?;

            Message::from_octets(Bytes::from(buf)).map_err(|e| TransportError::Protocol(e.to_string()))
        };

        tokio::time::timeout(self.timeout, fut).await.map_err(|_| TransportError::Timeout)?
    }
}

/// Establish the single TLS 1.2+ connection a DoT exchange uses.
///
/// `spec.md` §4.1 names "InsecureSkipVerify default" for opportunistic TLS;
/// when `tls.verify` is false this installs a verifier that accepts any
/// certificate chain, otherwise the platform `webpki-roots` trust store is
/// used.
async fn connect_tls(
    addr: SocketAddr,
    tls: &TlsConfig,
) -> Result<tokio_rustls::client::TlsStream<tokio::net::TcpStream>, TransportError> {
    let tcp = tokio::net::TcpStream::connect(addr).await.map_err(|e| TransportError::Network(e.to_string()))?;

    let client_config = build_rustls_client_config(tls);
    let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));

    let server_name = tls
        .server_name
        .clone()
        .unwrap_or_else(|| addr.ip().to_string());
    let server_name = rustls_pki_types::ServerName::try_from(server_name)
        .map_err(|e| TransportError::Tls(e.to_string()))?;

    connector.connect(server_name, tcp).await.map_err(|e| TransportError::Tls(e.to_string()))
}

fn build_rustls_client_config(tls: &TlsConfig) -> rustls::ClientConfig {
    // Idempotent: only the first call in the process actually installs a
    // provider, later calls just see it's already there.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let builder = rustls::ClientConfig::builder();

    if tls.verify {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
            .with_no_client_auth()
    }
}

/// Accepts any server certificate, for DoT's opportunistic-by-default mode
/// (`spec.md` §4.1/§5: "InsecureSkipVerify default").
#[derive(Debug)]
struct AcceptAnyServerCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls_pki_types::CertificateDer<'_>,
        _intermediates: &[rustls_pki_types::CertificateDer<'_>],
        _server_name: &rustls_pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls_pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider().signature_verification_algorithms.supported_schemes()
    }
}

fn build_doh_client(tls: &TlsConfig, timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(!tls.verify)
        .timeout(timeout)
        .build()
        .expect("reqwest client config is always valid")
}

/// Open a DoQ (RFC 9250) connection: TLS 1.3 mandatory, ALPN `"doq"`.
async fn connect_quic(addr: SocketAddr, tls: &TlsConfig) -> Result<quinn::Connection, TransportError> {
    let mut client_config = build_rustls_client_config(tls);
    client_config.alpn_protocols = vec![b"doq".to_vec()];

    let quic_client_config = quinn::crypto::rustls::QuicClientConfig::try_from(client_config)
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    let client_config = quinn::ClientConfig::new(Arc::new(quic_client_config));

    let bind_addr: SocketAddr = if addr.is_ipv4() { "0.0.0.0:0".parse().unwrap() } else { "[::]:0".parse().unwrap() };
    let mut endpoint = quinn::Endpoint::client(bind_addr).map_err(|e| TransportError::Network(e.to_string()))?;
    endpoint.set_default_client_config(client_config);

    let server_name = tls.server_name.clone().unwrap_or_else(|| addr.ip().to_string());
    let connecting = endpoint.connect(addr, &server_name).map_err(|e| TransportError::Network(e.to_string()))?;
    connecting.await.map_err(|e| TransportError::Network(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_config_defaults_to_opportunistic() {
        let tls = TlsConfig::default();
        assert!(!tls.verify);
    }

    #[test]
    fn client_options_default_enables_fallback() {
        let options = ClientOptions::default();
        assert!(!options.disable_fallback);
        assert!(!options.force_tcp);
    }
}
