//! Allocating and recycling transfer handles.

use crate::{driver::EventDriver, transfer::Transfer};
use std::sync::{Mutex, PoisonError};

/// Creates the transfer handle and event driver for each session and takes
/// them back when the session is released.
///
/// Sessions always return what they were given, whatever state they end in,
/// so a factory sees exactly one cleanup call per create call.
pub trait HandleFactory: Send + Sync + 'static {
    type Transfer: Transfer;
    type Driver: EventDriver<Self::Transfer>;

    fn create_handle(&self) -> Self::Transfer;
    fn create_driver(&self) -> Self::Driver;
    fn cleanup_handle(&self, handle: Self::Transfer);
    fn cleanup_driver(&self, driver: Self::Driver);
}

/// Keeps up to `capacity` released handles and drivers for reuse.
///
/// Released handles are [`reset`](Transfer::reset) before they are pooled. Once
/// the pool is full, further releases go to the wrapped factory.
pub struct PooledFactory<F: HandleFactory> {
    inner: F,
    capacity: usize,
    handles: Mutex<Vec<F::Transfer>>,
    drivers: Mutex<Vec<F::Driver>>,
}

impl<F: HandleFactory> PooledFactory<F> {
    pub fn new(inner: F, capacity: usize) -> Self {
        Self {
            inner,
            capacity,
            handles: Mutex::new(Vec::with_capacity(capacity)),
            drivers: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// The number of handles currently waiting in the pool.
    pub fn idle_handles(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<F: HandleFactory> HandleFactory for PooledFactory<F> {
    type Transfer = F::Transfer;
    type Driver = F::Driver;

    fn create_handle(&self) -> Self::Transfer {
        let pooled = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        pooled.unwrap_or_else(|| self.inner.create_handle())
    }

    fn create_driver(&self) -> Self::Driver {
        let pooled = self
            .drivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        pooled.unwrap_or_else(|| self.inner.create_driver())
    }

    fn cleanup_handle(&self, mut handle: Self::Transfer) {
        handle.reset();
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if handles.len() < self.capacity {
            handles.push(handle);
        } else {
            drop(handles);
            self.inner.cleanup_handle(handle);
        }
    }

    fn cleanup_driver(&self, mut driver: Self::Driver) {
        driver.reset();
        let mut drivers = self.drivers.lock().unwrap_or_else(PoisonError::into_inner);
        if drivers.len() < self.capacity {
            drivers.push(driver);
        } else {
            drop(drivers);
            self.inner.cleanup_driver(driver);
        }
    }
}
