//! Header block framing.
//!
//! Reads a byte stream up to the first blank line and splits what came before
//! it into header lines. Nothing after the terminator is consumed from the
//! reader's buffer, so body bytes are left for the relay.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::http::headers::HeaderSequence;
use crate::resilience::timeouts::io_timeout;

/// Marks the end of a header block.
pub const TERMINATOR: &[u8] = b"\r\n\r\n";

/// Why a header block could not be framed.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("end of stream reached before header block was complete ({read} bytes read)")]
    UnexpectedEof { read: usize },

    #[error("header block exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("header block is empty")]
    Empty,

    #[error("I/O error while reading header block: {0}")]
    Io(#[from] io::Error),
}

/// Read one header block of at most `max_bytes` bytes, terminator included.
///
/// `timeout` bounds each wait for more bytes. With `verbose` set the raw block
/// is logged.
pub async fn read_header_block<R>(
    reader: &mut R,
    max_bytes: usize,
    timeout: Option<Duration>,
    verbose: bool,
) -> Result<HeaderSequence, FramingError>
where
    R: AsyncBufRead + Unpin,
{
    let mut block: Vec<u8> = Vec::with_capacity(max_bytes.min(1024));

    loop {
        let (used, complete) = {
            let chunk = io_timeout(timeout, reader.fill_buf()).await?;
            if chunk.is_empty() {
                return Err(FramingError::UnexpectedEof { read: block.len() });
            }

            let mut used = 0;
            let mut complete = false;
            for &byte in chunk {
                if block.len() == max_bytes {
                    return Err(FramingError::TooLarge { limit: max_bytes });
                }
                block.push(byte);
                used += 1;
                if block.ends_with(TERMINATOR) {
                    complete = true;
                    break;
                }
            }
            (used, complete)
        };
        reader.consume(used);

        if complete {
            break;
        }
    }

    if verbose {
        tracing::info!(
            bytes = block.len(),
            block = %String::from_utf8_lossy(&block),
            "Header block captured"
        );
    }

    let content = &block[..block.len() - TERMINATOR.len()];
    // Deliberately refused: a block with no request or status line has
    // nothing to forward besides our own credentials.
    if content.is_empty() {
        return Err(FramingError::Empty);
    }
    Ok(HeaderSequence::from_block(content))
}
