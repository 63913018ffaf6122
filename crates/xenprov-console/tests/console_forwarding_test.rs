//! Console handshake through a running forwarding
//!
//! A mock pool master accepts `CONNECT /console?ref=...` (over TLS or plain
//! HTTP), checks the session cookie, greets with the RFB banner and then
//! echoes.

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use xenprov_console::XapiConsoleWrapper;
use xenprov_forward::Forwarding;

const SESSION: &str = "OpaqueRef:4f8c2d1e-session";
const RFB_BANNER: &[u8] = b"RFB 003.008\n";
const IO_TIMEOUT: Duration = Duration::from_secs(5);

fn tls_acceptor() -> TlsAcceptor {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
    let cert_der = cert.serialize_der().unwrap();
    let key_der = cert.serialize_private_key_der();

    let certs = vec![CertificateDer::from(cert_der)];
    let key = PrivateKeyDer::try_from(key_der).unwrap();

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();

    TlsAcceptor::from(Arc::new(config))
}

/// Serve one console session on `stream`
async fn serve_console<S>(stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    let mut request_line = String::new();
    if stream.read_line(&mut request_line).await.is_err() {
        return;
    }

    let mut authorized = false;
    loop {
        let mut header = String::new();
        match stream.read_line(&mut header).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        if header == "\r\n" {
            break;
        }
        if header.trim_end() == format!("Cookie: session_id={}", SESSION) {
            authorized = true;
        }
    }

    let valid_request = request_line.starts_with("CONNECT /console?ref=OpaqueRef:vm-console ");
    if !authorized || !valid_request {
        let _ = stream
            .get_mut()
            .write_all(b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\n\r\n")
            .await;
        return;
    }

    // Banner in the same write as the head: must survive the handshake
    let mut reply = b"HTTP/1.1 200 OK\r\nConnection: keep-alive\r\n\r\n".to_vec();
    reply.extend_from_slice(RFB_BANNER);
    if stream.get_mut().write_all(&reply).await.is_err() {
        return;
    }

    let mut buf = vec![0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if stream.get_mut().write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn start_console_server(tls: bool) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = tls.then(tls_acceptor);

    let handle = tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                match acceptor {
                    Some(acceptor) => {
                        if let Ok(stream) = acceptor.accept(socket).await {
                            serve_console(stream).await;
                        }
                    }
                    None => serve_console(socket).await,
                }
            });
        }
    });

    (addr, handle)
}

async fn read_exactly(client: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(IO_TIMEOUT, client.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .unwrap();
    buf
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tls_console_session_through_forwarding() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();

    let (server, _handle) = start_console_server(true).await;
    let location = format!(
        "https://127.0.0.1:{}/console?ref=OpaqueRef:vm-console",
        server.port()
    );
    let wrapper = XapiConsoleWrapper::new(&location, SESSION).unwrap();
    assert!(wrapper.uses_tls());

    let mut forwarding = Forwarding::new("127.0.0.1", server.port(), wrapper).unwrap();
    forwarding.start().await.unwrap();

    let mut client = TcpStream::connect(forwarding.local_addr().unwrap())
        .await
        .unwrap();

    assert_eq!(read_exactly(&mut client, RFB_BANNER.len()).await, RFB_BANNER);

    client.write_all(b"RFB 003.008\n").await.unwrap();
    assert_eq!(read_exactly(&mut client, 12).await, b"RFB 003.008\n");

    forwarding.close();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_plain_http_console_session() {
    let (server, _handle) = start_console_server(false).await;
    let location = format!(
        "http://127.0.0.1:{}/console?ref=OpaqueRef:vm-console",
        server.port()
    );
    let wrapper = XapiConsoleWrapper::new(&location, SESSION).unwrap();
    assert!(!wrapper.uses_tls());

    let mut forwarding = Forwarding::new("127.0.0.1", server.port(), wrapper).unwrap();
    forwarding.start().await.unwrap();

    let mut client = TcpStream::connect(forwarding.local_addr().unwrap())
        .await
        .unwrap();
    assert_eq!(read_exactly(&mut client, RFB_BANNER.len()).await, RFB_BANNER);

    client.write_all(b"ping").await.unwrap();
    assert_eq!(read_exactly(&mut client, 4).await, b"ping");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wrong_session_is_rejected_per_connection() {
    let (server, _handle) = start_console_server(true).await;
    let location = format!(
        "https://127.0.0.1:{}/console?ref=OpaqueRef:vm-console",
        server.port()
    );
    let wrapper = XapiConsoleWrapper::new(&location, "OpaqueRef:expired").unwrap();

    let mut forwarding = Forwarding::new("127.0.0.1", server.port(), wrapper).unwrap();
    forwarding.start().await.unwrap();

    for _ in 0..2 {
        let mut client = TcpStream::connect(forwarding.local_addr().unwrap())
            .await
            .unwrap();
        let mut buf = [0u8; 64];
        let result = tokio::time::timeout(IO_TIMEOUT, client.read(&mut buf))
            .await
            .expect("rejected connection was not closed");
        // Nothing from the 401 reply leaks to the client
        assert!(matches!(result, Ok(0) | Err(_)));
    }

    assert!(forwarding.is_running());
}
