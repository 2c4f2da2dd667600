//! NNTP client: connect, authenticate, fetch articles.
//!
//! Speaks the line-oriented NNTP wire protocol directly — no external NNTP
//! crate — since this is one of the components the engine exists to
//! implement rather than delegate. TLS is implicit (connect-then-handshake,
//! not STARTTLS), matching how most Usenet providers terminate TLS today.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{TlsConnector, client::TlsStream};

use crate::error::{Error, Result};
use crate::types::NntpServer;

/// Object-safe union of the two transports a connection can use.
enum RawStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for RawStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            RawStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            RawStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for RawStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            RawStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            RawStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            RawStream::Plain(s) => Pin::new(s).poll_flush(cx),
            RawStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            RawStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            RawStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// One NNTP connection: TCP (or TLS) stream, authenticated and ready for
/// `ARTICLE` commands.
pub struct NntpClient {
    stream: BufReader<RawStream>,
}

impl NntpClient {
    /// Connect to `server`, perform the TLS handshake if configured, and
    /// authenticate if credentials are present.
    pub async fn connect(server: &NntpServer) -> Result<Self> {
        let tcp = TcpStream::connect((server.host.as_str(), server.port))
            .await
            .map_err(Error::Io)?;
        tcp.set_nodelay(true).ok();

        let raw = if server.tls {
            let config = tls_config();
            let connector = TlsConnector::from(Arc::new(config));
            let domain = ServerName::try_from(server.host.clone())
                .map_err(|_| Error::Nntp(format!("invalid TLS server name: {}", server.host)))?;
            let tls_stream = connector
                .connect(domain, tcp)
                .await
                .map_err(|e| Error::Nntp(format!("TLS handshake failed: {e}")))?;
            RawStream::Tls(Box::new(tls_stream))
        } else {
            RawStream::Plain(tcp)
        };

        let mut client = Self {
            stream: BufReader::new(raw),
        };

        let greeting = client.read_status_line().await?;
        if !(greeting.starts_with("200") || greeting.starts_with("201")) {
            return Err(Error::Nntp(format!("unexpected greeting: {greeting}")));
        }

        if server.username.is_some() {
            client.authenticate(server).await?;
        }

        Ok(client)
    }

    async fn authenticate(&mut self, server: &NntpServer) -> Result<()> {
        let user = server.username.as_deref().unwrap_or_default();
        let pass = server.password.as_deref().unwrap_or_default();

        self.send_line(&format!("AUTHINFO USER {user}")).await?;
        let resp = self.read_status_line().await?;
        if resp.starts_with("381") {
            self.send_line(&format!("AUTHINFO PASS {pass}")).await?;
            let resp = self.read_status_line().await?;
            if !resp.starts_with("281") {
                return Err(Error::Nntp(format!("authentication failed: {resp}")));
            }
        } else if !resp.starts_with("281") {
            return Err(Error::Nntp(format!("authentication failed: {resp}")));
        }
        Ok(())
    }

    /// Fetch one article by message-id (without angle brackets) and return
    /// its body (headers stripped), with NNTP dot-unstuffing already undone.
    pub async fn get_article(&mut self, message_id: &str) -> Result<String> {
        self.send_line(&format!("ARTICLE <{message_id}>")).await?;
        let status = self.read_status_line().await?;
        if !status.starts_with("220") {
            return Err(Error::Nntp(format!(
                "ARTICLE <{message_id}> failed: {status}"
            )));
        }

        let mut in_headers = true;
        let mut body = String::new();
        loop {
            let line = self.read_line().await?;
            if line == "." {
                break;
            }
            let unstuffed = if let Some(rest) = line.strip_prefix('.') {
                rest
            } else {
                line.as_str()
            };

            if in_headers {
                if unstuffed.is_empty() {
                    in_headers = false;
                }
                continue;
            }

            body.push_str(unstuffed);
            body.push_str("\r\n");
        }

        Ok(body)
    }

    /// Send `QUIT` and close the connection. Errors sending QUIT are
    /// ignored — the connection is being torn down regardless.
    pub async fn close(mut self) {
        let _ = self.send_line("QUIT").await;
        let _ = self.stream.get_mut().shutdown().await;
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stream
            .get_mut()
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .map_err(Error::Io)?;
        self.stream.get_mut().flush().await.map_err(Error::Io)
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self.stream.read_line(&mut line).await.map_err(Error::Io)?;
        if n == 0 {
            return Err(Error::Nntp("connection closed by server".into()));
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    async fn read_status_line(&mut self) -> Result<String> {
        self.read_line().await
    }
}

fn tls_config() -> ClientConfig {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}
