//! Outbound block wire format
//!
//! ```text
//! [u32 message_length][u8 type=0][u32 block_length][24B nonce][header_blob][txs_blob]
//! ```
//!
//! Length fields are big-endian. `message_length = 1 + 4 + block_length` and
//! `block_length = 24 + len(header_blob) + len(txs_blob)`.

use crate::hasher::{InputLayout, NONCE_SIZE};
use crate::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;
use tokio_util::codec::Decoder;

/// Message type tag of a new block
pub const MESSAGE_TYPE_NEW_BLOCK: u8 = 0;

/// Bytes taken by a length prefix
pub const SIZE_PREFIX_LEN: usize = 4;

/// Length-prefixed writes into a growable buffer
pub struct BlockWriter<'a> {
    buf: &'a mut BytesMut,
    written: usize,
}

impl<'a> BlockWriter<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf, written: 0 }
    }

    /// Write a big-endian u32 size field
    pub fn write_size(&mut self, size: usize) -> Result<()> {
        let size = u32::try_from(size)
            .map_err(|_| Error::codec(format!("Size {} does not fit a u32 length field", size)))?;
        self.buf.put_u32(size);
        self.written += SIZE_PREFIX_LEN;
        Ok(())
    }

    pub fn write_byte(&mut self, byte: u8) {
        self.buf.put_u8(byte);
        self.written += 1;
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
        self.written += bytes.len();
    }

    /// Total bytes written through this writer
    pub fn written(&self) -> usize {
        self.written
    }
}

/// Append a new-block message to `out`, returning the number of bytes written
pub fn encode_new_block(
    out: &mut BytesMut,
    nonce: &[u8; NONCE_SIZE],
    header_blob: &[u8],
    txs_blob: &[u8],
) -> Result<usize> {
    let block_size = NONCE_SIZE + header_blob.len() + txs_blob.len();
    let message_size = 1 + SIZE_PREFIX_LEN + block_size;

    out.reserve(SIZE_PREFIX_LEN + message_size);
    let mut writer = BlockWriter::new(out);
    writer.write_size(message_size)?;
    writer.write_byte(MESSAGE_TYPE_NEW_BLOCK);
    writer.write_size(block_size)?;
    writer.write_bytes(nonce);
    writer.write_bytes(header_blob);
    writer.write_bytes(txs_blob);

    debug_assert_eq!(writer.written(), message_size + SIZE_PREFIX_LEN);
    Ok(writer.written())
}

/// A decoded new-block message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlock {
    pub nonce: [u8; NONCE_SIZE],
    pub header_blob: Bytes,
    pub txs_blob: Bytes,
}

impl NewBlock {
    /// Decode one complete frame.
    ///
    /// The wire does not delimit header from transactions, so the header
    /// length comes from the input layout.
    pub fn decode(frame: &[u8], layout: InputLayout) -> Result<Self> {
        let mut cursor = Cursor::new(frame);
        let message_size = cursor.read_u32::<BigEndian>()? as usize;
        if message_size + SIZE_PREFIX_LEN != frame.len() {
            return Err(Error::codec(format!(
                "Message length {} does not match frame of {} bytes",
                message_size,
                frame.len()
            )));
        }

        let message_type = cursor.read_u8()?;
        if message_type != MESSAGE_TYPE_NEW_BLOCK {
            return Err(Error::codec(format!(
                "Unexpected message type {}",
                message_type
            )));
        }

        let block_size = cursor.read_u32::<BigEndian>()? as usize;
        if message_size != 1 + SIZE_PREFIX_LEN + block_size {
            return Err(Error::codec(format!(
                "Block length {} inconsistent with message length {}",
                block_size, message_size
            )));
        }
        if block_size < NONCE_SIZE + layout.header_len() {
            return Err(Error::codec(format!(
                "Block of {} bytes is shorter than nonce and header",
                block_size
            )));
        }

        let mut body = Bytes::copy_from_slice(&frame[cursor.position() as usize..]);
        let mut nonce = [0u8; NONCE_SIZE];
        body.copy_to_slice(&mut nonce);
        let header_blob = body.split_to(layout.header_len());

        Ok(Self {
            nonce,
            header_blob,
            txs_blob: body,
        })
    }

    /// Encode back into a standalone frame
    pub fn encode(&self) -> Result<Bytes> {
        let mut out = BytesMut::new();
        encode_new_block(&mut out, &self.nonce, &self.header_blob, &self.txs_blob)?;
        Ok(out.freeze())
    }

    /// The hash input this block commits to
    pub fn hash_input(&self) -> Vec<u8> {
        let mut input = Vec::with_capacity(NONCE_SIZE + self.header_blob.len());
        input.extend_from_slice(&self.nonce);
        input.extend_from_slice(&self.header_blob);
        input
    }
}

/// Stream decoder for a sequence of new-block frames
#[derive(Debug, Clone, Copy)]
pub struct NewBlockDecoder {
    layout: InputLayout,
}

impl NewBlockDecoder {
    pub fn new(layout: InputLayout) -> Self {
        Self { layout }
    }
}

impl Decoder for NewBlockDecoder {
    type Item = NewBlock;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<NewBlock>> {
        if src.len() < SIZE_PREFIX_LEN {
            return Ok(None);
        }
        let message_size = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        let frame_len = SIZE_PREFIX_LEN + message_size;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(frame_len);
        NewBlock::decode(&frame, self.layout).map(Some)
    }
}
