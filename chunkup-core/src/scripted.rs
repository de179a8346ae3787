//! An in-memory transport that records what it is asked to send.
//!
//! [`ScriptedTransfer`] pulls body bytes exactly like a network transport
//! would, but keeps them in a shared [`TransferLog`] instead of writing them
//! anywhere. Once it has pulled end-of-body it hands back a canned
//! [`Response`]. Faults can be injected to exercise the session's failure
//! paths.
//!
//! ```
//! use chunkup_core::{scripted::{PullRecord, ScriptedFactory}, UploadRequestBuilder};
//! use std::sync::Arc;
//!
//! # tokio_test_block_on(async {
//! let factory = ScriptedFactory::new();
//! let log = factory.log();
//! let mut session = UploadRequestBuilder::new(Arc::new(factory), "http://test/").open().unwrap();
//! session.push(b"hello".to_vec()).await.unwrap();
//! let response = session.close().await.unwrap();
//! assert_eq!(response.status(), 200);
//! assert_eq!(log.pulls(), [PullRecord::Data(b"hello".to_vec()), PullRecord::End]);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use crate::{
    driver::{EventDriver, Readiness},
    error::{ConfigError, TransferError},
    factory::HandleFactory,
    headers::HeaderMap,
    response::{Response, ResponseSink},
    transfer::{Pull, RequestConfig, Transfer, TransferIo},
};
use std::{
    io,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

/// One answer the session gave to a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRecord {
    Data(Vec<u8>),
    End,
}

/// A failure to inject into a scripted transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Every increment after the first `n` fails with a connection reset.
    FailAfter(usize),
    /// After end-of-body, report no outstanding work without ever
    /// delivering a response.
    Stall,
    /// Deliver the response on the first increment, before pulling anything.
    RespondEarly,
}

#[derive(Debug, Default)]
struct Record {
    request: Option<RequestConfig>,
    pulls: Vec<PullRecord>,
    pauses: usize,
    increments: usize,
    wait_timeouts: Vec<Duration>,
    handles_created: usize,
    handles_released: usize,
    drivers_created: usize,
    drivers_released: usize,
}

/// A shared view of everything the scripted transports did.
#[derive(Debug, Clone, Default)]
pub struct TransferLog {
    record: Arc<Mutex<Record>>,
}

impl TransferLog {
    fn with<R>(&self, f: impl FnOnce(&mut Record) -> R) -> R {
        let mut record = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut record)
    }

    /// The last request a transfer was configured with.
    pub fn request(&self) -> Option<RequestConfig> {
        self.with(|r| r.request.clone())
    }

    /// Every non-paused pull, in the order it happened.
    pub fn pulls(&self) -> Vec<PullRecord> {
        self.with(|r| r.pulls.clone())
    }

    /// The pulled body bytes concatenated.
    pub fn body(&self) -> Vec<u8> {
        self.with(|r| {
            r.pulls
                .iter()
                .flat_map(|pull| match pull {
                    PullRecord::Data(bytes) => bytes.as_slice(),
                    PullRecord::End => &[][..],
                })
                .copied()
                .collect()
        })
    }

    /// How many pulls found the buffer empty while the session was open.
    pub fn pauses(&self) -> usize {
        self.with(|r| r.pauses)
    }

    pub fn increments(&self) -> usize {
        self.with(|r| r.increments)
    }

    /// The timeout of every readiness wait, in order.
    pub fn wait_timeouts(&self) -> Vec<Duration> {
        self.with(|r| r.wait_timeouts.clone())
    }

    pub fn handles_created(&self) -> usize {
        self.with(|r| r.handles_created)
    }

    pub fn handles_released(&self) -> usize {
        self.with(|r| r.handles_released)
    }

    pub fn drivers_created(&self) -> usize {
        self.with(|r| r.drivers_created)
    }

    pub fn drivers_released(&self) -> usize {
        self.with(|r| r.drivers_released)
    }
}

#[derive(Debug, Clone)]
struct Script {
    response: Response,
    max_pull: usize,
    fault: Option<Fault>,
    idle_rounds: usize,
    greedy: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            response: Response::new(200, HeaderMap::new(), Vec::new()),
            max_pull: 64 * 1024,
            fault: None,
            idle_rounds: 0,
            greedy: false,
        }
    }
}

/// A transfer that pulls one piece of body per increment, or, when greedy,
/// keeps pulling until the session pauses it or ends the body.
#[derive(Debug)]
pub struct ScriptedTransfer {
    log: TransferLog,
    script: Script,
    configured: bool,
    ended: bool,
    delivered: bool,
    increments: usize,
}

impl ScriptedTransfer {
    fn deliver(&mut self, io: &mut TransferIo<'_>) {
        let response = &self.script.response;
        io.status(response.status());
        for (name, value) in response.headers().iter() {
            io.header(name, value);
        }
        io.payload(response.payload());
        io.complete();
        self.delivered = true;
    }
}

impl Transfer for ScriptedTransfer {
    fn configure(&mut self, request: &RequestConfig) -> Result<(), ConfigError> {
        self.log.with(|r| r.request = Some(request.clone()));
        self.configured = true;
        Ok(())
    }

    fn perform(&mut self, io: &mut TransferIo<'_>) -> Result<usize, TransferError> {
        if !self.configured {
            return Err(TransferError::NotConfigured);
        }
        self.increments += 1;
        self.log.with(|r| r.increments += 1);

        match self.script.fault {
            Some(Fault::FailAfter(limit)) if self.increments > limit => {
                let reset = io::Error::new(io::ErrorKind::ConnectionReset, "scripted reset");
                return Err(reset.into());
            }
            Some(Fault::RespondEarly) if !self.delivered => {
                self.deliver(io);
                return Ok(0);
            }
            _ => {}
        }
        if self.delivered {
            return Ok(0);
        }

        let mut scratch = vec![0; self.script.max_pull];
        while !self.ended {
            match io.pull(&mut scratch) {
                Pull::Data(n) => {
                    let piece = scratch[..n].to_vec();
                    self.log.with(|r| r.pulls.push(PullRecord::Data(piece)));
                    if !self.script.greedy {
                        break;
                    }
                }
                Pull::Pause => {
                    self.log.with(|r| r.pauses += 1);
                    break;
                }
                Pull::End => {
                    self.ended = true;
                    self.log.with(|r| r.pulls.push(PullRecord::End));
                }
            }
        }

        if self.ended {
            if self.script.fault != Some(Fault::Stall) {
                self.deliver(io);
            }
            return Ok(0);
        }
        Ok(1)
    }

    fn reset(&mut self) {
        self.configured = false;
        self.ended = false;
        self.delivered = false;
        self.increments = 0;
    }
}

/// A driver that is ready immediately, after an optional number of idle
/// rounds that each sleep for the full timeout.
#[derive(Debug)]
pub struct ScriptedDriver {
    log: TransferLog,
    idle_rounds: usize,
    remaining_idle: usize,
}

#[async_trait::async_trait]
impl EventDriver<ScriptedTransfer> for ScriptedDriver {
    async fn wait_for_readiness(
        &mut self,
        _handle: &mut ScriptedTransfer,
        timeout: Duration,
    ) -> Result<Readiness, TransferError> {
        self.log.with(|r| r.wait_timeouts.push(timeout));
        if self.remaining_idle > 0 {
            self.remaining_idle -= 1;
            tokio::time::sleep(timeout).await;
            Ok(Readiness::TimedOut)
        } else {
            tokio::task::yield_now().await;
            Ok(Readiness::Ready)
        }
    }

    fn reset(&mut self) {
        self.remaining_idle = self.idle_rounds;
    }
}

/// Hands out scripted transfers and drivers that all share one
/// [`TransferLog`].
#[derive(Debug, Default)]
pub struct ScriptedFactory {
    log: TransferLog,
    script: Script,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The response delivered after end-of-body.
    pub fn with_response(mut self, response: Response) -> Self {
        self.script.response = response;
        self
    }

    /// The most bytes a single pull asks for.
    pub fn with_max_pull(mut self, max_pull: usize) -> Self {
        self.script.max_pull = max_pull.max(1);
        self
    }

    /// Keep pulling within one increment until the buffer runs dry, the way a
    /// socket transport fills its send window.
    pub fn with_greedy_pulls(mut self) -> Self {
        self.script.greedy = true;
        self
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.script.fault = Some(fault);
        self
    }

    /// How many readiness waits time out before the driver reports ready.
    pub fn with_idle_rounds(mut self, rounds: usize) -> Self {
        self.script.idle_rounds = rounds;
        self
    }

    pub fn log(&self) -> TransferLog {
        self.log.clone()
    }
}

impl HandleFactory for ScriptedFactory {
    type Transfer = ScriptedTransfer;
    type Driver = ScriptedDriver;

    fn create_handle(&self) -> ScriptedTransfer {
        self.log.with(|r| r.handles_created += 1);
        ScriptedTransfer {
            log: self.log.clone(),
            script: self.script.clone(),
            configured: false,
            ended: false,
            delivered: false,
            increments: 0,
        }
    }

    fn create_driver(&self) -> ScriptedDriver {
        self.log.with(|r| r.drivers_created += 1);
        ScriptedDriver {
            log: self.log.clone(),
            idle_rounds: self.script.idle_rounds,
            remaining_idle: self.script.idle_rounds,
        }
    }

    fn cleanup_handle(&self, _handle: ScriptedTransfer) {
        self.log.with(|r| r.handles_released += 1);
    }

    fn cleanup_driver(&self, _driver: ScriptedDriver) {
        self.log.with(|r| r.drivers_released += 1);
    }
}
