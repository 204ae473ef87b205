//! HTTP/3 connection handle.
//!
//! The handle sends commands to a driver task and receives responses via
//! channels. Clones share the same driver, so requests are multiplexed.

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::transport::h3::driver::{DriverCommand, StreamResponse};
use crate::transport::TransportRequest;

#[derive(Clone, Debug)]
pub struct H3Handle {
    command_tx: mpsc::Sender<DriverCommand>,
}

impl H3Handle {
    pub fn new(command_tx: mpsc::Sender<DriverCommand>) -> Self {
        Self { command_tx }
    }

    /// Whether the driver has exited.
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    pub async fn send_request(&self, request: TransportRequest) -> Result<StreamResponse> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(DriverCommand::SendRequest {
                request,
                response_tx,
            })
            .await
            .map_err(|_| Error::quic("HTTP/3 driver is gone"))?;

        response_rx
            .await
            .map_err(|_| Error::quic("HTTP/3 driver dropped the request"))?
    }
}
