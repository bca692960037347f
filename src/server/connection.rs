//! Per-connection worker.
//!
//! Each request is expected in a single read of at most `read_buffer_size`
//! bytes. The worker answers every chunk it reads, in order, until the peer
//! closes the connection or the handler chain fails.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::dispatch::{DispatchError, Service};

/// Why a connection worker stopped early.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client already received a `500`.
    #[error(transparent)]
    Fatal(DispatchError),
}

/// Serves one connection until EOF.
///
/// # Errors
///
/// [`ConnectionError::Io`] if reading or writing fails, and
/// [`ConnectionError::Fatal`] after a handler-chain failure has been answered.
pub async fn handle_connection<S>(
    mut stream: S,
    peer_addr: SocketAddr,
    service: &Service,
    read_buffer_size: usize,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; read_buffer_size];

    loop {
        let bytes_read = stream.read(&mut buf).await?;

        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }

        let exchange = service.respond(&buf[..bytes_read]).await;
        stream.write_all(&exchange.response).await?;
        stream.flush().await?;

        if let Some(err) = exchange.fatal {
            return Err(ConnectionError::Fatal(err));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;
    use crate::http::Request;
    use crate::server::ServerBuilder;

    fn service() -> Service {
        let mut app = ServerBuilder::new();
        app.get("/ping", |_req: Request| async { "pong" })
            .unwrap()
            .get("/fails", |_req: Request| async {
                Err::<&'static str, _>(std::io::Error::other("boom"))
            })
            .unwrap();
        app.into_service()
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:1".parse().unwrap()
    }

    async fn read_response(client: &mut tokio::io::DuplexStream) -> String {
        let mut buf = vec![0u8; 1024];
        let n = client.read(&mut buf).await.unwrap();
        String::from_utf8(buf[..n].to_vec()).unwrap()
    }

    #[tokio::test]
    async fn keeps_serving_after_a_bad_request() {
        let svc = service();
        let (mut client, server) = duplex(4096);

        let worker = async { handle_connection(server, peer(), &svc, 2048).await };
        let driver = async {
            client.write_all(b"garbage").await.unwrap();
            let first = read_response(&mut client).await;
            assert!(first.starts_with("HTTP/1.1 400 Bad Request\r\n"));

            client.write_all(b"GET /ping HTTP/1.1\r\n\r\n").await.unwrap();
            let second = read_response(&mut client).await;
            assert!(second.starts_with("HTTP/1.1 200 OK\r\n"));
            assert!(second.ends_with("\r\n\r\npong"));

            drop(client);
        };

        let (result, ()) = tokio::join!(worker, driver);
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn handler_failure_ends_the_connection() {
        let svc = service();
        let (mut client, server) = duplex(4096);

        let worker = async { handle_connection(server, peer(), &svc, 2048).await };
        let driver = async {
            client.write_all(b"GET /fails HTTP/1.1\r\n\r\n").await.unwrap();
            let response = read_response(&mut client).await;
            assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
            client
        };

        let (result, _client) = tokio::join!(worker, driver);
        match result {
            Err(ConnectionError::Fatal(err)) => assert!(err.is_fatal()),
            other => panic!("expected a fatal error, got {other:?}"),
        }
    }
}
