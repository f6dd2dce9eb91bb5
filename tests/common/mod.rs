//! Integration test common infrastructure.
//!
//! Provides a scriptable fake IRC server: tests accept one client
//! connection, assert on the lines the client writes, and feed it canned
//! server lines.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::time::timeout;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// A listening fake server, waiting for its single client.
pub struct FakeServer {
    listener: TcpListener,
}

impl FakeServer {
    pub async fn bind() -> FakeServer {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        FakeServer { listener }
    }

    pub fn addr(&self) -> SocketAddr {
        self.listener.local_addr().expect("listener address")
    }

    pub async fn accept(self) -> FakeConn {
        let (stream, _) = timeout(IO_TIMEOUT, self.listener.accept())
            .await
            .expect("client connected in time")
            .expect("accept");
        let (read, write) = stream.into_split();
        FakeConn {
            reader: BufReader::new(read),
            writer: write,
        }
    }
}

/// One accepted connection, read and written line-by-line.
pub struct FakeConn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl FakeConn {
    /// Send one line to the client (CRLF appended).
    pub async fn send(&mut self, line: &str) {
        let data = format!("{line}\r\n");
        timeout(IO_TIMEOUT, self.writer.write_all(data.as_bytes()))
            .await
            .expect("write in time")
            .expect("write");
    }

    /// Receive the next line from the client, without its terminator.
    pub async fn recv(&mut self) -> String {
        let mut line = String::new();
        let n = timeout(IO_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("read in time")
            .expect("read");
        assert!(n > 0, "client closed the connection unexpectedly");
        line.trim_end_matches(['\r', '\n']).to_owned()
    }

    /// Receive lines until one starts with `prefix`, returning it. Lets
    /// tests skip lines they don't care about.
    pub async fn recv_matching(&mut self, prefix: &str) -> String {
        loop {
            let line = self.recv().await;
            if line.starts_with(prefix) {
                return line;
            }
        }
    }
}
