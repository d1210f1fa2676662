//! SmtpClient (C6): a small hand-rolled SMTP client supporting implicit TLS,
//! opportunistic STARTTLS, and `AUTH LOGIN`, with an explicit `close()` —
//! async teardown is not a place to lean on `Drop` (§4.4 expansion).

pub mod mime;

use crate::error::SmtpError;
use crate::model::{DeliveryResult, SmtpConfig};
use base64::Engine;
use chrono::Utc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{client::TlsStream, rustls, TlsConnector};

const STAGE_TIMEOUT: Duration = Duration::from_secs(30);
const IMPLICIT_TLS_PORT: u16 = 465;

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// Bridges the enum-dispatched `Stream` into a single concrete type `tokio::io`
/// traits can poll, and allows the inner stream to be swapped in place for
/// an in-progress STARTTLS upgrade.
struct StreamAdapter(Option<Stream>);

impl StreamAdapter {
    fn inner_mut(&mut self) -> &mut Stream {
        self.0.as_mut().expect("StreamAdapter used after take")
    }
}

impl tokio::io::AsyncRead for StreamAdapter {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.inner_mut() {
            Stream::Plain(s) => std::pin::Pin::new(s).poll_read(cx, buf),
            Stream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl tokio::io::AsyncWrite for StreamAdapter {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        match self.inner_mut() {
            Stream::Plain(s) => std::pin::Pin::new(s).poll_write(cx, buf),
            Stream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.inner_mut() {
            Stream::Plain(s) => std::pin::Pin::new(s).poll_flush(cx),
            Stream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.inner_mut() {
            Stream::Plain(s) => std::pin::Pin::new(s).poll_shutdown(cx),
            Stream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

struct Response {
    code: u16,
    lines: Vec<String>,
}

impl Response {
    fn is_error(&self) -> bool {
        matches!(self.code / 100, 4 | 5)
    }

    fn into_result(self) -> Result<Self, SmtpError> {
        if self.is_error() {
            Err(SmtpError::ServerRejected { code: self.code, text: self.lines.join(" ") })
        } else {
            Ok(self)
        }
    }
}

async fn read_response(reader: &mut BufReader<StreamAdapter>) -> Result<Response, SmtpError> {
    let mut lines = Vec::new();
    let mut code = 0u16;

    loop {
        let mut line = String::new();
        let read = timeout(STAGE_TIMEOUT, reader.read_line(&mut line))
            .await
            .map_err(|_| SmtpError::Timeout)?
            .map_err(|e| SmtpError::StreamSetupFailed(e.to_string()))?;
        if read == 0 {
            return Err(SmtpError::StreamSetupFailed("connection closed".into()));
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.len() < 4 {
            return Err(SmtpError::StreamSetupFailed(format!("malformed response: {trimmed:?}")));
        }
        code = trimmed[..3].parse().unwrap_or(0);
        let sep = trimmed.as_bytes()[3];
        lines.push(trimmed[4..].to_string());
        if sep == b' ' {
            break;
        }
    }

    Ok(Response { code, lines })
}

async fn send_line(stream: &mut BufReader<StreamAdapter>, line: &str) -> Result<(), SmtpError> {
    let adapter = stream.get_mut();
    adapter
        .write_all(format!("{line}\r\n").as_bytes())
        .await
        .map_err(|e| SmtpError::StreamSetupFailed(e.to_string()))?;
    adapter.flush().await.map_err(|e| SmtpError::StreamSetupFailed(e.to_string()))
}

/// A connected, authenticated SMTP session. Construct via [`SmtpClient::connect`],
/// send at most one message, then call [`SmtpClient::close`] explicitly.
pub struct SmtpClient {
    stream: BufReader<StreamAdapter>,
}

impl SmtpClient {
    /// Connect, negotiate TLS per `config.port`/`config.use_tls`, and
    /// authenticate. Port 465 means implicit TLS; any other port with
    /// `use_tls` means opportunistic STARTTLS; otherwise plaintext.
    pub async fn connect(config: &SmtpConfig, password: &str) -> Result<Self, SmtpError> {
        let addr = format!("{}:{}", config.host, config.port);
        let tcp = timeout(STAGE_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| SmtpError::Timeout)?
            .map_err(|e| SmtpError::StreamSetupFailed(e.to_string()))?;

        let initial = if config.port == IMPLICIT_TLS_PORT {
            Stream::Tls(Box::new(upgrade_to_tls(tcp, &config.host).await?))
        } else {
            Stream::Plain(tcp)
        };

        let mut client = Self {
            stream: BufReader::new(StreamAdapter(Some(initial))),
        };

        read_response(&mut client.stream).await?.into_result()?;

        let helo_host = "folio-core";
        client.ehlo(helo_host).await?;

        if config.port != IMPLICIT_TLS_PORT && config.use_tls {
            client.starttls(&config.host).await?;
            client.ehlo(helo_host).await?;
        }

        client.auth_login(&config.username, password).await?;

        Ok(client)
    }

    async fn ehlo(&mut self, host: &str) -> Result<(), SmtpError> {
        send_line(&mut self.stream, &format!("EHLO {host}")).await?;
        read_response(&mut self.stream).await?.into_result()?;
        Ok(())
    }

    async fn starttls(&mut self, host: &str) -> Result<(), SmtpError> {
        send_line(&mut self.stream, "STARTTLS").await?;
        read_response(&mut self.stream).await?.into_result()?;

        let adapter = self.stream.get_mut();
        let plain = match adapter.0.take() {
            Some(Stream::Plain(tcp)) => tcp,
            _ => return Err(SmtpError::TlsHandshakeFailed("not in a plaintext state".into())),
        };
        let upgraded = upgrade_to_tls(plain, host).await?;
        adapter.0 = Some(Stream::Tls(Box::new(upgraded)));
        Ok(())
    }

    async fn auth_login(&mut self, username: &str, password: &str) -> Result<(), SmtpError> {
        send_line(&mut self.stream, "AUTH LOGIN").await?;
        read_response(&mut self.stream)
            .await?
            .into_result()
            .map_err(|_| SmtpError::AuthenticationFailed)?;

        let b64 = base64::engine::general_purpose::STANDARD;

        send_line(&mut self.stream, &b64.encode(username)).await?;
        read_response(&mut self.stream)
            .await?
            .into_result()
            .map_err(|_| SmtpError::AuthenticationFailed)?;

        send_line(&mut self.stream, &b64.encode(password)).await?;
        read_response(&mut self.stream)
            .await?
            .into_result()
            .map_err(|_| SmtpError::AuthenticationFailed)?;

        Ok(())
    }

    /// Send a single message to one recipient and return the result record.
    pub async fn send_message(
        &mut self,
        from: &str,
        to: &str,
        book_title: &str,
        subject: &str,
        body: &str,
    ) -> Result<DeliveryResult, SmtpError> {
        match self.send_message_inner(from, to, subject, body).await {
            Ok(()) => Ok(DeliveryResult {
                success: true,
                book_title: book_title.to_string(),
                destination: to.to_string(),
                message: "delivered".to_string(),
                timestamp: Utc::now(),
            }),
            Err(e) => {
                send_line(&mut self.stream, "QUIT").await.ok();
                Err(e)
            }
        }
    }

    async fn send_message_inner(
        &mut self,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), SmtpError> {
        send_line(&mut self.stream, &format!("MAIL FROM:<{from}>")).await?;
        read_response(&mut self.stream).await?.into_result()?;

        send_line(&mut self.stream, &format!("RCPT TO:<{to}>")).await?;
        read_response(&mut self.stream).await?.into_result()?;

        send_line(&mut self.stream, "DATA").await?;
        read_response(&mut self.stream).await?.into_result()?;

        let headers = format!("From: {from}\r\nTo: {to}\r\nSubject: {subject}\r\nMIME-Version: 1.0\r\n");
        let dot_stuffed = dot_stuff(&format!("{headers}{body}"));

        let adapter = self.stream.get_mut();
        adapter
            .write_all(dot_stuffed.as_bytes())
            .await
            .map_err(|e| SmtpError::StreamSetupFailed(e.to_string()))?;
        adapter.flush().await.map_err(|e| SmtpError::StreamSetupFailed(e.to_string()))?;

        send_line(&mut self.stream, "\r\n.").await?;
        read_response(&mut self.stream).await?.into_result()?;

        Ok(())
    }

    /// Explicitly tear down the session with `QUIT`. Not done in a `Drop`
    /// impl: quitting is fallible I/O and async, and a dropped client whose
    /// caller already errored out should not retry it silently.
    pub async fn close(mut self) -> Result<(), SmtpError> {
        send_line(&mut self.stream, "QUIT").await?;
        let _ = read_response(&mut self.stream).await;
        Ok(())
    }
}

fn dot_stuff(body: &str) -> String {
    body.split("\r\n")
        .map(|line| if line.starts_with('.') { format!(".{line}") } else { line.to_string() })
        .collect::<Vec<_>>()
        .join("\r\n")
}

async fn upgrade_to_tls(tcp: TcpStream, host: &str) -> Result<TlsStream<TcpStream>, SmtpError> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(std::sync::Arc::new(config));
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| SmtpError::TlsHandshakeFailed(format!("invalid hostname: {host}")))?;

    timeout(STAGE_TIMEOUT, connector.connect(server_name, tcp))
        .await
        .map_err(|_| SmtpError::Timeout)?
        .map_err(|e| SmtpError::TlsHandshakeFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_stuffing_escapes_leading_dots() {
        let body = "hello\r\n.world\r\n..double\r\nfine";
        assert_eq!(dot_stuff(body), "hello\r\n..world\r\n...double\r\nfine");
    }

    struct DuplexAdapter(tokio::io::DuplexStream);

    impl tokio::io::AsyncRead for DuplexAdapter {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.0).poll_read(cx, buf)
        }
    }

    async fn read_duplex_response(reader: &mut BufReader<DuplexAdapter>) -> Response {
        let mut lines = Vec::new();
        let mut code = 0u16;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let trimmed = line.trim_end_matches(['\r', '\n']);
            code = trimmed[..3].parse().unwrap();
            let sep = trimmed.as_bytes()[3];
            lines.push(trimmed[4..].to_string());
            if sep == b' ' {
                break;
            }
        }
        Response { code, lines }
    }

    #[tokio::test]
    async fn response_parser_handles_multiline_continuation() {
        let raw = b"250-PIPELINING\r\n250-SIZE 35882577\r\n250 STARTTLS\r\n";
        let (client, mut server) = tokio::io::duplex(256);
        tokio::spawn(async move {
            server.write_all(raw).await.unwrap();
        });
        let mut reader = BufReader::new(DuplexAdapter(client));
        let response = read_duplex_response(&mut reader).await;
        assert_eq!(response.code, 250);
        assert_eq!(response.lines.len(), 3);
        assert!(!response.is_error());
    }

    #[tokio::test]
    async fn response_parser_flags_4xx_and_5xx_as_errors() {
        let raw = b"550 mailbox unavailable\r\n";
        let (client, mut server) = tokio::io::duplex(256);
        tokio::spawn(async move {
            server.write_all(raw).await.unwrap();
        });
        let mut reader = BufReader::new(DuplexAdapter(client));
        let response = read_duplex_response(&mut reader).await;
        assert_eq!(response.code, 550);
        assert!(response.is_error());
    }
}
