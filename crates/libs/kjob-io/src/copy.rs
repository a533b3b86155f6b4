//! Copy of a container log stream into the shared sink.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::sink::{SharedSink, is_sink_closed_error};

/// Copy `reader` into `sink` until end of stream.
///
/// Each chunk read is forwarded with a single [`SharedSink::write_all`], which
/// keeps the byte order of one stream intact. Returns the number of bytes
/// copied.
pub async fn copy_stream<R>(mut reader: R, sink: &SharedSink, buffer_size: usize) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut copied = 0u64;
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            trace!("Stream ended after {copied} bytes");
            return Ok(copied);
        }
        sink.write_all(&buffer[..n]).await?;
        copied += n as u64;
    }
}

/// Determine if the given error only says that the stream (or the sink) was
/// closed, which happens on normal or requested termination.
pub fn is_stream_closed_error(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        return true;
    }
    if is_sink_closed_error(err) {
        return true;
    }
    is_closed_response_body_message(&err.to_string())
}

/// Determine if the error message describes a closed response body.
pub fn is_closed_response_body_message(message: &str) -> bool {
    message.ends_with("response body closed")
}
