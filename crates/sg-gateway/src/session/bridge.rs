//! Byte copying between the channel and the pty
//!
//! The pty side only offers blocking handles, so each direction pairs an
//! async half with a `spawn_blocking` half joined by a bounded queue.

use std::io::{self, Read, Write};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Size of one read from either side
pub(crate) const CHUNK_SIZE: usize = 4096;

/// Chunks in flight between the async and blocking halves
const QUEUE_DEPTH: usize = 32;

/// Copy pty output to the channel until the pty reaches EOF, either side
/// errors, or the session is closed
///
/// Returns the number of bytes delivered to the channel.
pub(crate) async fn pty_to_channel<W>(
    reader: Box<dyn Read + Send>,
    mut channel: W,
    closed: CancellationToken,
) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let (tx, mut rx) = mpsc::channel::<io::Result<Bytes>>(QUEUE_DEPTH);
    tokio::task::spawn_blocking(move || read_pty(reader, tx));

    let mut copied = 0u64;
    loop {
        let chunk = tokio::select! {
            _ = closed.cancelled() => break,
            chunk = rx.recv() => chunk,
        };

        match chunk {
            Some(Ok(data)) => {
                channel.write_all(&data).await?;
                channel.flush().await?;
                copied += data.len() as u64;
            }
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }

    Ok(copied)
}

fn read_pty(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<io::Result<Bytes>>) {
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let chunk = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => Err(e),
        };
        let failed = chunk.is_err();
        if tx.blocking_send(chunk).is_err() || failed {
            break;
        }
    }
}

/// Copy channel input to the pty until the client sends EOF, either side
/// errors, or the session is closed
///
/// Returns the number of bytes read from the channel.
pub(crate) async fn channel_to_pty<R>(
    mut channel: R,
    writer: Box<dyn Write + Send>,
    closed: CancellationToken,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let (tx, rx) = mpsc::channel::<Bytes>(QUEUE_DEPTH);
    let sink = tokio::task::spawn_blocking(move || write_pty(writer, rx));

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut copied = 0u64;
    loop {
        let n = tokio::select! {
            _ = closed.cancelled() => break,
            n = channel.read(&mut buf) => n?,
        };
        if n == 0 {
            break;
        }

        if tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
            // The writer only hangs up after a failed write
            return match sink.await {
                Ok(Err(e)) => Err(e),
                _ => Err(io::ErrorKind::BrokenPipe.into()),
            };
        }
        copied += n as u64;
    }

    Ok(copied)
}

fn write_pty(mut writer: Box<dyn Write + Send>, mut rx: mpsc::Receiver<Bytes>) -> io::Result<()> {
    while let Some(chunk) = rx.blocking_recv() {
        writer.write_all(&chunk)?;
        writer.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "input/output error"))
        }
    }

    #[tokio::test]
    async fn test_pty_output_reaches_channel() {
        let (client, server) = tokio::io::duplex(64);
        let reader = Box::new(Cursor::new(b"hello from the pty".to_vec()));

        let copied = pty_to_channel(reader, server, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(copied, 18);

        let mut client = client;
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello from the pty");
    }

    #[tokio::test]
    async fn test_pty_read_error_is_reported() {
        let (_client, server) = tokio::io::duplex(64);
        let result = pty_to_channel(Box::new(FailingReader), server, CancellationToken::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_pty_to_channel_fails_when_channel_is_gone() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);

        let reader = Box::new(Cursor::new(vec![b'x'; 1024]));
        let result = pty_to_channel(reader, server, CancellationToken::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_channel_input_reaches_pty() {
        let (mut client, server) = tokio::io::duplex(64);
        let sink = SharedBuf::default();

        client.write_all(b"ls -la\n").await.unwrap();
        drop(client);

        let copied = channel_to_pty(server, Box::new(sink.clone()), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(copied, 7);

        // The blocking writer drains the queue on its own schedule
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while sink.contents().len() < 7 && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.contents(), b"ls -la\n");
    }

    #[tokio::test]
    async fn test_pty_write_error_stops_copy() {
        let (mut client, server) = tokio::io::duplex(64);

        let feeder = tokio::spawn(async move {
            for _ in 0..200 {
                if client.write_all(b"x").await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            channel_to_pty(server, Box::new(BrokenWriter), CancellationToken::new()),
        )
        .await
        .unwrap();

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
        feeder.abort();
    }

    #[tokio::test]
    async fn test_channel_to_pty_stops_on_close() {
        let (_client, server) = tokio::io::duplex(64);
        let closed = CancellationToken::new();
        closed.cancel();

        let copied = channel_to_pty(server, Box::new(SharedBuf::default()), closed)
            .await
            .unwrap();
        assert_eq!(copied, 0);
    }
}
