//! command_executor.rs - Runs session operations on a dedicated worker thread.
//!
//! The worker owns the `Session` and answers `CommandRequest`s in the order
//! they arrive, so a front-end thread never blocks on a package manager and
//! privileged operations can never overlap.

use std::sync::mpsc::{Receiver, Sender};
use std::thread::JoinHandle;

use tracing::{debug, error, info};

use crate::protocol::{OperationRequest, OperationResponse};
use crate::session::Session;

/// Unique identifier for each request/response pair.
pub type CommandId = u64;

/// A request to run one operation.
#[derive(Debug)]
pub struct CommandRequest {
    pub id: CommandId,
    pub request: OperationRequest,
}

/// The outcome of a request, tagged with the request's id.
#[derive(Debug)]
pub struct CommandResponse {
    pub id: CommandId,
    pub response: OperationResponse,
}

/// Spawns the worker thread.
///
/// The thread keeps answering requests from `request_rx` until the sending
/// side hangs up or `response_tx`'s receiver is dropped.
pub fn spawn_executor_thread(
    session: Session,
    request_rx: Receiver<CommandRequest>,
    response_tx: Sender<CommandResponse>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        debug!("Command executor thread started.");
        while let Ok(CommandRequest { id, request }) = request_rx.recv() {
            let operation = request.name();
            debug!("Executing request {}: {:?}", id, request);
            let response = session.handle(request);
            info!(
                "Request {} ({}) finished: success={}",
                id, operation, response.success
            );

            if response_tx.send(CommandResponse { id, response }).is_err() {
                error!("Failed to send command response. Receiver probably dropped.");
                break;
            }
        }
        debug!("Command executor thread shut down.");
    })
}
