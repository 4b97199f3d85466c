//! Destinations for serialized blocks
//!
//! The network forwarder lives outside this crate; sinks are the seam it
//! plugs into.

use crate::codec::NewBlock;
use crate::hasher::InputLayout;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

/// Receives complete new-block frames
#[async_trait]
pub trait BlockSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn submit(&self, frame: Bytes) -> Result<()>;
}

/// Forwards frames into a channel
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl BlockSink for ChannelSink {
    fn name(&self) -> &'static str {
        "channel"
    }

    async fn submit(&self, frame: Bytes) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| Error::sink("block channel closed"))
    }
}

/// Appends raw frames to a file
pub struct FileSink {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl FileSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        info!(path = %path.display(), "Writing found blocks to file");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl BlockSink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn submit(&self, frame: Bytes) -> Result<()> {
        let mut file = self.file.lock().await;
        file.write_all(&frame).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Logs each frame; used when no output is configured
pub struct LogSink {
    layout: InputLayout,
}

impl LogSink {
    pub fn new(layout: InputLayout) -> Self {
        Self { layout }
    }
}

#[async_trait]
impl BlockSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn submit(&self, frame: Bytes) -> Result<()> {
        match NewBlock::decode(&frame, self.layout) {
            Ok(block) => info!(
                nonce = %hex::encode(block.nonce),
                txs = block.txs_blob.len(),
                bytes = frame.len(),
                "New block"
            ),
            Err(e) => warn!(error = %e, "Undecodable block frame"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_new_block;
    use crate::hasher::NONCE_SIZE;
    use bytes::BytesMut;

    fn frame(nonce: u8) -> Bytes {
        let mut out = BytesMut::new();
        encode_new_block(&mut out, &[nonce; NONCE_SIZE], &[1, 2, 3], b"tx").unwrap();
        out.freeze()
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = ChannelSink::new(tx);
        sink.submit(frame(1)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), frame(1));

        drop(rx);
        assert!(sink.submit(frame(2)).await.is_err());
    }

    #[tokio::test]
    async fn test_file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.bin");

        let sink = FileSink::open(&path).await.unwrap();
        sink.submit(frame(1)).await.unwrap();
        sink.submit(frame(2)).await.unwrap();

        let contents = tokio::fs::read(&path).await.unwrap();
        let mut expected = frame(1).to_vec();
        expected.extend_from_slice(&frame(2));
        assert_eq!(contents, expected);
        assert_eq!(sink.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_log_sink_accepts_anything() {
        let sink = LogSink::new(InputLayout::new(3));
        assert!(sink.submit(frame(1)).await.is_ok());
        assert!(sink.submit(Bytes::from_static(b"junk")).await.is_ok());
    }
}
