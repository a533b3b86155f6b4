//! Log stream I/O for kjob.
//!
//! Provides the output sink shared by every container log copy and the copy
//! loop itself, together with the classification of errors that only mean
//! "the stream was closed".
//!
//! # Usage
//!
//! ```rust
//! use kjob_io::{copy::copy_stream, sink::SharedSink};
//!
//! #[tokio::main]
//! async fn main() {
//!     let sink = SharedSink::new(tokio::io::sink());
//!     let copied = copy_stream(&b"hello\n"[..], &sink, 1024).await.unwrap();
//!     assert_eq!(copied, 6);
//!     sink.close().await.unwrap();
//! }
//! ```

pub mod copy;
pub mod sink;
