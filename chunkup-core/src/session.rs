//! The [`UploadSession`] and its close handshake.

use crate::{
    buffer::DoubleBuffer,
    driver::{Backoff, EventDriver},
    error::{TransferError, UploadError},
    factory::HandleFactory,
    headers::HeaderMap,
    options::UploadOptions,
    response::{Response, ResponseAccumulator},
    transfer::{RequestConfig, Transfer, TransferIo},
};
use std::{fmt, sync::Arc};

/// A session shared between tasks. The mutex serializes entry into the wait
/// loop, which must only ever be run by one task at a time.
pub type SharedUpload<F> = Arc<tokio::sync::Mutex<UploadSession<F>>>;

/// Where a session is in its lifecycle.
///
/// ```text
///  Open --close()--> Closing --body ended + response--> Closed
///    |                  |
///    +------fault-------+-----------------------------> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Accepting buffers.
    Open,
    /// The caller asked to close. The remaining bytes are being drained, or
    /// the body has ended and the session is waiting for the response.
    Closing,
    /// The transport ended the body and the response is available.
    Closed,
    /// A transport fault or a stalled transfer aborted the session. The only
    /// thing left to do is drop it.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

enum Phase {
    Open,
    Closing,
    Closed(Response),
    Failed,
}

/// A streaming upload of unknown length over chunked transfer encoding.
///
/// The session holds one buffer at a time. [`push`](Self::push) waits until
/// the transport has pulled every byte of the current buffer, then installs
/// the next one, so bytes reach the transport in exactly the order they were
/// pushed. While waiting, the calling task drives the transport itself: it
/// performs one increment of work, checks whether it is done, and otherwise
/// waits on the event driver with a growing timeout.
///
/// All driving methods take `&mut self`, so only one task can ever be inside
/// the wait loop. Wrap the session in a [`SharedUpload`] to share it.
///
/// Dropping the session returns its handle and driver to the factory in any
/// state. Dropping does not complete the upload; call
/// [`close`](Self::close) for that.
pub struct UploadSession<F: HandleFactory> {
    factory: Arc<F>,
    handle: Option<F::Transfer>,
    driver: Option<F::Driver>,
    request: RequestConfig,
    options: UploadOptions,
    buffer: DoubleBuffer,
    response: ResponseAccumulator,
    phase: Phase,
    /// Set once the transport has been answered with end-of-body. This is the
    /// second half of the close handshake, after `Phase::Closing`.
    body_closed: bool,
    paused: bool,
}

impl<F: HandleFactory> UploadSession<F> {
    /// Opens a `POST` upload to `destination`.
    pub fn open(
        factory: Arc<F>,
        destination: &str,
        headers: HeaderMap,
        user_agent: &str,
        options: UploadOptions,
    ) -> Result<Self, UploadError> {
        let request = RequestConfig::new(destination, user_agent)?.with_headers(headers)?;
        Self::open_request(factory, request, options)
    }

    /// Opens an upload for a fully built request.
    pub fn open_request(
        factory: Arc<F>,
        request: RequestConfig,
        options: UploadOptions,
    ) -> Result<Self, UploadError> {
        let mut handle = factory.create_handle();
        if let Err(e) = handle.configure(&request) {
            factory.cleanup_handle(handle);
            return Err(e.into());
        }
        let driver = factory.create_driver();
        tracing::debug!(
            destination = %request.destination(),
            method = request.method(),
            "opened upload session"
        );
        Ok(Self {
            factory,
            handle: Some(handle),
            driver: Some(driver),
            buffer: DoubleBuffer::with_capacity(options.initial_buffer_size),
            request,
            options,
            response: ResponseAccumulator::new(),
            phase: Phase::Open,
            body_closed: false,
            paused: false,
        })
    }

    /// True until [`close`](Self::close) has been called or the session
    /// failed.
    pub fn is_open(&self) -> bool {
        matches!(self.phase, Phase::Open)
    }

    pub fn state(&self) -> SessionState {
        match self.phase {
            Phase::Open => SessionState::Open,
            Phase::Closing => SessionState::Closing,
            Phase::Closed(_) => SessionState::Closed,
            Phase::Failed => SessionState::Failed,
        }
    }

    pub fn request(&self) -> &RequestConfig {
        &self.request
    }

    /// Bytes of the current buffer the transport has not pulled yet.
    pub fn buffered(&self) -> usize {
        self.buffer.remaining().len()
    }

    /// Whether the transport last found the buffer empty and is waiting for
    /// the next [`push`](Self::push).
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Drains the current buffer to the transport, then makes `chunk` the
    /// current buffer.
    ///
    /// Returns the previous buffer's allocation, emptied, so the caller can
    /// fill it with the next chunk without allocating. An empty `chunk` is
    /// valid and only flushes.
    pub async fn push(&mut self, chunk: Vec<u8>) -> Result<Vec<u8>, UploadError> {
        self.validate_open("push")?;
        self.wait("buffer drain", Self::buffer_drained).await?;
        self.paused = false;
        Ok(self.buffer.swap(chunk))
    }

    /// Waits until the transport has pulled every byte of the current buffer.
    pub async fn flush(&mut self) -> Result<(), UploadError> {
        self.validate_open("flush")?;
        self.wait("buffer drain", Self::buffer_drained).await
    }

    /// Ends the body and waits for the server's response.
    ///
    /// The remaining bytes are drained first; the pull after that answers
    /// end-of-body, and the session keeps driving the transport until the
    /// response is complete. Calling `close` on a closed session returns the
    /// same response again. If an earlier `close` was abandoned before it
    /// finished, calling it again resumes the handshake.
    pub async fn close(&mut self) -> Result<Response, UploadError> {
        if let Phase::Closed(response) = &self.phase {
            return Ok(response.clone());
        }
        match self.state() {
            SessionState::Open => {
                tracing::debug!(
                    buffered = self.buffered(),
                    destination = %self.request.destination(),
                    "closing upload session"
                );
                self.phase = Phase::Closing;
            }
            SessionState::Closing | SessionState::Closed => {}
            SessionState::Failed => {
                return Err(UploadError::InvalidState {
                    operation: "close",
                    state: SessionState::Failed,
                })
            }
        }

        self.wait("end of body", |session| session.body_closed)
            .await?;
        self.wait("response", |session| session.response.is_complete())
            .await?;

        let response = self.response.finish();
        tracing::debug!(
            status = response.status(),
            payload = response.payload().len(),
            "upload session closed"
        );
        self.phase = Phase::Closed(response.clone());
        Ok(response)
    }

    fn buffer_drained(&self) -> bool {
        self.buffer.is_drained()
    }

    fn validate_open(&self, operation: &'static str) -> Result<(), UploadError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(UploadError::InvalidState {
                operation,
                state: self.state(),
            })
        }
    }

    /// Runs the wait loop and marks the session failed if it does not succeed.
    async fn wait(
        &mut self,
        awaiting: &'static str,
        predicate: impl Fn(&Self) -> bool + Send,
    ) -> Result<(), UploadError> {
        let result = self.drive_until(awaiting, predicate).await;
        if let Err(error) = &result {
            tracing::warn!(%error, awaiting, "upload session failed");
            self.phase = Phase::Failed;
        }
        result
    }

    async fn drive_until(
        &mut self,
        awaiting: &'static str,
        predicate: impl Fn(&Self) -> bool + Send,
    ) -> Result<(), UploadError> {
        let mut backoff = Backoff::new(self.options.backoff);
        while !predicate(&*self) {
            if self.options.logging_enabled {
                tracing::trace!(
                    awaiting,
                    size = self.buffer.len(),
                    delivered = self.buffer.delivered(),
                    status = ?self.response.status_code(),
                    received = self.response.payload_len(),
                    "predicate is false"
                );
            }
            let running = self.perform_work()?;
            if predicate(&*self) {
                return Ok(());
            }
            if running == 0 {
                tracing::debug!(awaiting, "transport reports no outstanding work");
                return Err(UploadError::ExhaustedWork { awaiting });
            }
            self.wait_for_handles(&mut backoff).await?;
        }
        Ok(())
    }

    fn perform_work(&mut self) -> Result<usize, TransferError> {
        let handle = self.handle.as_mut().ok_or(TransferError::Released)?;
        let closing = matches!(self.phase, Phase::Closing);
        let mut io = TransferIo::new(
            &mut self.buffer,
            &mut self.response,
            closing,
            &mut self.body_closed,
            &mut self.paused,
        );
        handle.perform(&mut io)
    }

    async fn wait_for_handles(&mut self, backoff: &mut Backoff) -> Result<(), TransferError> {
        let (Some(handle), Some(driver)) = (self.handle.as_mut(), self.driver.as_mut()) else {
            return Err(TransferError::Released);
        };
        let readiness = driver.wait_for_readiness(handle, backoff.current()).await?;
        backoff.observe(readiness);
        Ok(())
    }

    /// Wraps the session for use from several tasks.
    pub fn into_shared(self) -> SharedUpload<F> {
        Arc::new(tokio::sync::Mutex::new(self))
    }
}

impl<F: HandleFactory> Drop for UploadSession<F> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.factory.cleanup_handle(handle);
        }
        if let Some(driver) = self.driver.take() {
            self.factory.cleanup_driver(driver);
        }
        if matches!(self.phase, Phase::Open | Phase::Closing) {
            tracing::debug!(
                state = %self.state(),
                destination = %self.request.destination(),
                "released upload session before it closed"
            );
        }
    }
}

impl<F: HandleFactory> fmt::Debug for UploadSession<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadSession")
            .field("destination", &self.request.destination().as_str())
            .field("state", &self.state())
            .field("buffered", &self.buffered())
            .field("body_closed", &self.body_closed)
            .finish()
    }
}
