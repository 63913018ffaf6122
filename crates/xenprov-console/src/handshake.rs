//! HTTP `CONNECT` handshake against a console location

use crate::tls::tls_connector;
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;
use url::Url;
use xenprov_forward::{BoxedStream, ConnectionWrapper, HandshakeError};

/// Upper bound on the size of the `CONNECT` response head
pub const MAX_RESPONSE_HEAD: usize = 16 * 1024;

/// Opens a console session over each outbound connection.
///
/// For `https` locations the stream is wrapped in TLS first. The request
/// carries the session reference as the `session_id` cookie; anything other
/// than a `200` reply fails the handshake. Bytes the server sends right after
/// the response head stay buffered in the returned stream.
pub struct XapiConsoleWrapper {
    request: String,
    tls: Option<(TlsConnector, ServerName<'static>)>,
}

impl XapiConsoleWrapper {
    /// Certificate chains are not validated, matching how pool masters are
    /// normally deployed. Use [`with_verified_tls`](Self::with_verified_tls)
    /// to check them.
    pub fn new(location: &str, session: &str) -> Result<Self, HandshakeError> {
        Self::build(location, session, false)
    }

    pub fn with_verified_tls(location: &str, session: &str) -> Result<Self, HandshakeError> {
        Self::build(location, session, true)
    }

    fn build(location: &str, session: &str, verify_tls: bool) -> Result<Self, HandshakeError> {
        let url = Url::parse(location)
            .map_err(|e| HandshakeError::InvalidLocation(format!("{}: {}", location, e)))?;
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| HandshakeError::InvalidLocation(format!("{}: no host", location)))?;

        let tls = match url.scheme() {
            "https" => {
                let name = host.trim_start_matches('[').trim_end_matches(']');
                let server_name = ServerName::try_from(name)
                    .map_err(|e| HandshakeError::InvalidLocation(format!("{}: {}", location, e)))?
                    .to_owned();
                Some((tls_connector(verify_tls), server_name))
            }
            "http" => None,
            other => {
                return Err(HandshakeError::InvalidLocation(format!(
                    "{}: unsupported scheme '{}'",
                    location, other
                )))
            }
        };

        Ok(Self {
            request: connect_request(&url, host, session),
            tls,
        })
    }

    pub fn uses_tls(&self) -> bool {
        self.tls.is_some()
    }

    async fn open_session<S>(&self, stream: S) -> Result<BoxedStream, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut stream = BufReader::new(stream);
        stream.get_mut().write_all(self.request.as_bytes()).await?;
        stream.get_mut().flush().await?;

        let status_line = read_response_head(&mut stream).await?;
        debug!(status = %status_line, "Console session established");

        Ok(Box::new(stream))
    }
}

#[async_trait]
impl ConnectionWrapper for XapiConsoleWrapper {
    async fn wrap(&self, stream: TcpStream) -> Result<BoxedStream, HandshakeError> {
        match &self.tls {
            Some((connector, server_name)) => {
                let stream = connector
                    .connect(server_name.clone(), stream)
                    .await
                    .map_err(|e| HandshakeError::Tls(e.to_string()))?;
                self.open_session(stream).await
            }
            None => self.open_session(stream).await,
        }
    }
}

fn connect_request(url: &Url, host: &str, session: &str) -> String {
    let target = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };
    let host_header = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    format!(
        "CONNECT {} HTTP/1.0\r\nHost: {}\r\nCookie: session_id={}\r\n\r\n",
        target, host_header, session
    )
}

/// Consume the response head and return its status line.
///
/// Fails unless the status code is 200.
async fn read_response_head<R>(reader: &mut R) -> Result<String, HandshakeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut status_line: Option<String> = None;
    let mut consumed = 0usize;
    let mut line = Vec::new();

    loop {
        line.clear();
        // One byte past the budget is enough to detect an oversized head
        let budget = (MAX_RESPONSE_HEAD - consumed) as u64 + 1;
        let n = (&mut *reader).take(budget).read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Err(HandshakeError::MalformedResponse(
                "connection closed before the response head ended".to_string(),
            ));
        }
        consumed += n;
        if consumed > MAX_RESPONSE_HEAD {
            return Err(HandshakeError::MalformedResponse(format!(
                "response head exceeds {} bytes",
                MAX_RESPONSE_HEAD
            )));
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\r', '\n']);

        match status_line {
            None => {
                parse_status_line(text)?;
                status_line = Some(text.to_string());
            }
            Some(ref status) if text.is_empty() => return Ok(status.clone()),
            Some(_) => {}
        }
    }
}

/// Parse `HTTP/1.x <code> <reason>`, accepting only code 200
pub fn parse_status_line(line: &str) -> Result<u16, HandshakeError> {
    let mut parts = line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(HandshakeError::MalformedResponse(format!(
            "unexpected status line '{}'",
            line
        )));
    }

    let code = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| {
            HandshakeError::MalformedResponse(format!("missing status code in '{}'", line))
        })?;

    if code != 200 {
        return Err(HandshakeError::Rejected {
            status_line: line.to_string(),
        });
    }

    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_request_format() {
        let url = Url::parse("https://xen.example.com/console?ref=OpaqueRef:abc-123").unwrap();
        let request = connect_request(&url, "xen.example.com", "OpaqueRef:session");
        assert_eq!(
            request,
            "CONNECT /console?ref=OpaqueRef:abc-123 HTTP/1.0\r\n\
             Host: xen.example.com\r\n\
             Cookie: session_id=OpaqueRef:session\r\n\r\n"
        );

        let url = Url::parse("http://10.0.0.2:8080/console").unwrap();
        let request = connect_request(&url, "10.0.0.2", "s");
        assert!(request.starts_with("CONNECT /console HTTP/1.0\r\nHost: 10.0.0.2:8080\r\n"));
    }

    #[test]
    fn test_parse_status_line() {
        assert_eq!(parse_status_line("HTTP/1.1 200 OK").unwrap(), 200);
        assert_eq!(parse_status_line("HTTP/1.0 200").unwrap(), 200);
        assert!(matches!(
            parse_status_line("HTTP/1.1 401 Unauthorized"),
            Err(HandshakeError::Rejected { .. })
        ));
        assert!(matches!(
            parse_status_line("RFB 003.008"),
            Err(HandshakeError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_status_line("HTTP/1.1 abc"),
            Err(HandshakeError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_read_response_head_keeps_trailing_bytes() {
        let data: &[u8] = b"HTTP/1.1 200 OK\r\nConnection: keep-alive\r\n\r\nRFB 003.008\n";
        let mut reader = BufReader::new(data);
        let status = read_response_head(&mut reader).await.unwrap();
        assert_eq!(status, "HTTP/1.1 200 OK");

        let mut rest = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut reader, &mut rest)
            .await
            .unwrap();
        assert_eq!(rest, "RFB 003.008\n");
    }

    #[tokio::test]
    async fn test_read_response_head_truncated() {
        let data: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n";
        let mut reader = BufReader::new(data);
        assert!(matches!(
            read_response_head(&mut reader).await,
            Err(HandshakeError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_read_response_head_stops_on_endless_line() {
        // Never sends a newline; the head budget must end the read
        let mut reader = BufReader::new(tokio::io::repeat(b'a'));
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            read_response_head(&mut reader),
        )
        .await
        .expect("oversized line was not cut off");
        assert!(matches!(result, Err(HandshakeError::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn test_read_response_head_rejects_oversized_headers() {
        let mut data = b"HTTP/1.1 200 OK\r\n".to_vec();
        while data.len() <= MAX_RESPONSE_HEAD {
            data.extend_from_slice(b"X-Padding: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n");
        }
        data.extend_from_slice(b"\r\n");
        let mut reader = BufReader::new(data.as_slice());
        assert!(matches!(
            read_response_head(&mut reader).await,
            Err(HandshakeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_wrapper_rejects_bad_locations() {
        assert!(matches!(
            XapiConsoleWrapper::new("ftp://xen.example.com/console", "s"),
            Err(HandshakeError::InvalidLocation(_))
        ));
        assert!(matches!(
            XapiConsoleWrapper::new("console", "s"),
            Err(HandshakeError::InvalidLocation(_))
        ));

        assert!(XapiConsoleWrapper::new("https://xen.example.com/console", "s")
            .unwrap()
            .uses_tls());
        assert!(!XapiConsoleWrapper::new("http://xen.example.com/console", "s")
            .unwrap()
            .uses_tls());
        assert!(XapiConsoleWrapper::new("https://[fd00::1]/console", "s")
            .unwrap()
            .uses_tls());
    }
}
