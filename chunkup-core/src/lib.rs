//! Streaming uploads over HTTP chunked transfer encoding.
//!
//! An [`UploadSession`] sends a request body of unknown length to an HTTP
//! endpoint. The caller hands the session one buffer at a time; the session
//! keeps exactly one buffer in flight and lets the underlying transport pull
//! bytes out of it whenever the connection can accept more output.
//!
//! # Organization
//! - [`Transfer`] and [`EventDriver`] describe the transport a session drives
//! - [`HandleFactory`] hands out transports and takes them back on release
//! - [`UploadSession`] implements the push/close protocol on top of them
//! - [`http1`] provides a transport over a plain TCP connection
//! - `scripted` (with the `test-util` feature) provides an in-memory
//!   transport that records what it pulls
//!
//! # Session structure
//!
//! A session moves through a two-phase close. While open, every
//! [`push`](UploadSession::push) first drains the current buffer to the
//! transport, then swaps the new buffer in. [`close`](UploadSession::close)
//! drains what is left, answers the next pull with end-of-body, and then keeps
//! driving the transport until the server's response is complete. Sending
//! "I am done" and receiving "the server is done" are separate steps, and the
//! session only reports itself closed after observing both.
//!
//! ```no_run
//! use chunkup_core::{http1::Http1Factory, UploadRequestBuilder};
//! use std::sync::Arc;
//!
//! # async fn upload() -> Result<(), chunkup_core::UploadError> {
//! let factory = Arc::new(Http1Factory::default());
//! let mut session = UploadRequestBuilder::new(factory, "http://127.0.0.1:8080/upload")
//!     .header("content-type", "application/octet-stream")
//!     .open()?;
//! let spare = session.push(b"hello ".to_vec()).await?;
//! session.push(b"world".to_vec()).await?;
//! let response = session.close().await?;
//! assert_eq!(response.status(), 200);
//! # drop(spare);
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub use buffer::DoubleBuffer;

mod builder;
pub use builder::UploadRequestBuilder;

pub mod driver;
pub use driver::{Backoff, BackoffPolicy, EventDriver, Readiness};

pub mod error;
pub use error::{ConfigError, TransferError, UploadError};

pub mod factory;
pub use factory::{HandleFactory, PooledFactory};

pub mod headers;
pub use headers::HeaderMap;

pub mod http1;

mod options;
pub use options::UploadOptions;

pub mod response;
pub use response::{Response, ResponseAccumulator, ResponseSink};

#[cfg(any(test, feature = "test-util"))]
pub mod scripted;

pub mod session;
pub use session::{SessionState, SharedUpload, UploadSession};

pub mod transfer;
pub use transfer::{Pull, RequestConfig, Transfer, TransferIo};
