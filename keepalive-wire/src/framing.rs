// Copyright 2024 Cloudflare, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Length prefixed messages
//!
//! Every message is a 4-byte big-endian length followed by exactly that many payload bytes.

use bytes::{BufMut, Bytes, BytesMut};
use pingora_error::{Error, ErrorType, ErrorType::*, OrErr, Result};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The size of the length prefix
pub const HEADER_SIZE: usize = 4;
/// The largest payload [read_frame()] accepts
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// The length prefix is larger than what can be sent or accepted
pub const FRAME_TOO_LARGE: ErrorType = ErrorType::new("FrameTooLarge");

/// Write one message and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let len = u32::try_from(payload.len())
        .explain_err(FRAME_TOO_LARGE, |_| {
            format!("payload of {} bytes does not fit the header", payload.len())
        })?;
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u32(len);
    buf.put_slice(payload);
    writer
        .write_all(&buf)
        .await
        .or_err(WriteError, "while writing frame")?;
    writer.flush().await.or_err(WriteError, "while flushing frame")
}

/// Read exactly one message.
///
/// Running out of data in the middle of the header or the payload fails with
/// [ErrorType::ConnectionClosed].
pub async fn read_frame<R>(reader: &mut R) -> Result<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_SIZE];
    read_full(reader, &mut header, "frame header").await?;

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        // refuse before allocating
        return Error::e_explain(
            FRAME_TOO_LARGE,
            format!("frame of {len} bytes exceeds the limit of {MAX_FRAME_SIZE}"),
        );
    }

    let mut payload = BytesMut::zeroed(len);
    read_full(reader, &mut payload, "frame payload").await?;
    Ok(payload.freeze())
}

async fn read_full<R>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Error::e_because(ConnectionClosed, format!("short read on {what}"), e)
        }
        Err(e) => Error::e_because(ReadError, format!("while reading {what}"), e),
    }
}
