use super::Http1Transfer;
use crate::{
    driver::{EventDriver, Readiness},
    error::TransferError,
};
use std::time::Duration;
use tokio::net::TcpStream;

/// Opens the transfer's connection on the first wait and afterwards waits on
/// the socket's readiness through the tokio reactor.
#[derive(Debug, Clone)]
pub struct TokioDriver {
    connect_timeout: Duration,
}

impl TokioDriver {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn connect(
        &self,
        handle: &mut Http1Transfer,
        authority: String,
    ) -> Result<(), TransferError> {
        tracing::debug!(%authority, "connecting");
        let connected =
            tokio::time::timeout(self.connect_timeout, TcpStream::connect(authority.as_str())).await;
        let stream = match connected {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(TransferError::Connect { authority, source }),
            Err(_) => return Err(TransferError::Timeout("connecting")),
        };
        stream.set_nodelay(true)?;
        handle.attach(stream);
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventDriver<Http1Transfer> for TokioDriver {
    async fn wait_for_readiness(
        &mut self,
        handle: &mut Http1Transfer,
        timeout: Duration,
    ) -> Result<Readiness, TransferError> {
        if let Some(authority) = handle.pending_connect() {
            let authority = authority.to_string();
            self.connect(handle, authority).await?;
            return Ok(Readiness::Ready);
        }
        let interest = handle.interest();
        let Some(stream) = handle.stream() else {
            return Ok(Readiness::Ready);
        };
        match tokio::time::timeout(timeout, stream.ready(interest)).await {
            Ok(ready) => {
                ready?;
                Ok(Readiness::Ready)
            }
            Err(_) => Ok(Readiness::TimedOut),
        }
    }
}
