//! A scripted in-memory control daemon for driving the client from
//! the other end of a duplex stream.

#![allow(dead_code)]

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

/// The daemon side of an in-memory control connection.
pub struct MockDaemon {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl MockDaemon {
    /// Create a connected (client stream, daemon) pair.
    pub fn new() -> (DuplexStream, MockDaemon) {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let (reader, writer) = tokio::io::split(server);
        (
            client,
            MockDaemon {
                reader: BufReader::new(reader),
                writer,
            },
        )
    }

    /// Read one line sent by the client, without its terminator.
    /// Panics if the client closed the stream.
    pub async fn read_line(&mut self) -> String {
        let mut buf = String::new();
        let n = self.reader.read_line(&mut buf).await.unwrap();
        assert!(n > 0, "client closed the control stream");
        buf.trim_end_matches(['\r', '\n']).to_string()
    }

    /// Assert the next line from the client.
    pub async fn expect(&mut self, line: &str) {
        assert_eq!(self.read_line().await, line);
    }

    /// Write raw reply text.
    pub async fn send(&mut self, text: &str) {
        self.writer.write_all(text.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Write one CRLF-terminated reply line.
    pub async fn send_line(&mut self, line: &str) {
        self.send(&format!("{}\r\n", line)).await;
    }

    /// Drop the daemon, closing its end of the stream.
    pub fn close(self) {}
}
