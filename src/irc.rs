// src/irc.rs
//! Minimal IRC client: register, join, say one thing, quit.

use crate::config::IrcConfig;
use crate::error::SinkError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// Strips characters that would end or split an IRC line.
pub fn sanitize(param: &str) -> String {
    param.chars().filter(|c| !matches!(c, '\r' | '\n' | '\0')).collect()
}

/// The lines sent before waiting for the welcome reply.
pub fn registration_lines(nick: &str, password: Option<&str>) -> Vec<String> {
    let nick = sanitize(nick);
    let mut lines = Vec::with_capacity(3);
    if let Some(password) = password {
        lines.push(format!("PASS {}", sanitize(password)));
    }
    lines.push(format!("NICK {}", nick));
    lines.push(format!("USER {} 0 * :{}", nick, nick));
    lines
}

pub fn privmsg_line(channel: &str, message: &str) -> String {
    format!("PRIVMSG {} :{}", sanitize(channel), sanitize(message))
}

/// Splits a raw server line into its command (or numeric) and the params after it.
fn command_of(line: &str) -> (&str, &str) {
    let rest = match line.strip_prefix(':') {
        Some(prefixed) => prefixed.split_once(' ').map(|(_, r)| r).unwrap_or(""),
        None => line,
    };
    rest.split_once(' ').unwrap_or((rest, ""))
}

async fn send_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    debug!("IRC >> {}", line);
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await
}

/// Drives one session over an established stream.
///
/// Registers, waits for `001` (answering `PING` meanwhile), joins the channel,
/// sends `message`, waits `quit_delay` and quits.
pub async fn deliver<S>(stream: S, irc: &IrcConfig, message: &str) -> Result<(), SinkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    for line in registration_lines(&irc.nick, irc.password.as_deref()) {
        send_line(&mut writer, &line).await?;
    }

    loop {
        let line = lines.next_line().await?.ok_or_else(|| {
            SinkError::Protocol("connection closed before registration completed".to_string())
        })?;
        debug!("IRC << {}", line);
        match command_of(&line) {
            ("PING", token) => send_line(&mut writer, &format!("PONG {}", token)).await?,
            ("001", _) => break,
            ("ERROR", reason) => return Err(SinkError::Protocol(reason.to_string())),
            // Nickname in use / erroneous / password mismatch.
            (code @ ("432" | "433" | "464"), reason) => {
                return Err(SinkError::Protocol(format!("{} {}", code, reason)))
            }
            _ => {}
        }
    }

    send_line(&mut writer, &format!("JOIN {}", sanitize(&irc.channel))).await?;
    send_line(&mut writer, &privmsg_line(&irc.channel, message)).await?;
    tokio::time::sleep(irc.quit_delay).await;
    send_line(&mut writer, "QUIT").await?;
    writer.shutdown().await.ok();
    Ok(())
}

/// Opens a fresh TLS connection to the configured server and delivers `message`.
///
/// The whole session, connect included, is bounded by `timeout`.
pub async fn send_over_tls(
    irc: &IrcConfig,
    message: &str,
    timeout: Duration,
) -> Result<(), SinkError> {
    let session = async {
        let host = irc
            .server
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&irc.server)
            .to_string();
        let server_name = ServerName::try_from(host.clone())
            .map_err(|e| SinkError::Tls(format!("invalid server name {}: {}", host, e)))?;

        let connector = TlsConnector::from(Arc::new(tls_config(irc.insecure_tls)?));
        let tcp = TcpStream::connect(&irc.server).await?;
        let tls = connector.connect(server_name, tcp).await?;
        info!("Connected to IRC server {}", irc.server);
        deliver(tls, irc, message).await
    };

    match tokio::time::timeout(timeout, session).await {
        Ok(result) => result,
        Err(_) => Err(SinkError::Timeout),
    }
}

fn tls_config(insecure: bool) -> Result<ClientConfig, SinkError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| SinkError::Tls(e.to_string()))?;

    if insecure {
        warn!("IRC certificate verification is disabled");
        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
            .with_no_client_auth());
    }

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Ok(builder.with_root_certificates(roots).with_no_client_auth())
}

/// Accepts any server certificate, still checking handshake signatures.
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
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
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
