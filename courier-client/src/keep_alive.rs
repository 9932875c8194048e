use std::sync::Arc;

use courier_packets::{pingreq::PingReqPacket, ControlPacket};
use tokio::time;
use tracing::{debug, error};

use crate::{
    connection::Shared,
    error::Result,
    event::{DisconnectReason, OperationType},
    info::OperationFlags,
    operation::Operation,
};

/// Starts sending PINGREQs every keep-alive interval. The task holds a
/// connection reference until it exits.
pub(crate) fn spawn(shared: Arc<Shared>) -> bool {
    if !shared.increment_references() {
        return false;
    }

    tokio::spawn(async move {
        run(&shared).await;
        shared.decrement_references();
    });

    true
}

async fn run(shared: &Arc<Shared>) {
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            _ = time::sleep(shared.keep_alive) => {}
        }

        // Cleared by the receive task when the PINGRESP arrives.
        shared.set_keep_alive_failure(true);

        if let Err(err) = ping(shared).await {
            error!(connection = %shared.id, "Failed to send PINGREQ: {}", err);
            shared.close_network(DisconnectReason::KeepAliveTimeout).await;
            return;
        }

        tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            _ = time::sleep(shared.config.response_wait) => {}
        }

        if shared.keep_alive_failure() {
            error!(connection = %shared.id, "No PINGRESP received.");
            shared.close_network(DisconnectReason::KeepAliveTimeout).await;
            return;
        }

        debug!(connection = %shared.id, "Keep-alive acknowledged.");
    }
}

async fn ping(shared: &Arc<Shared>) -> Result<()> {
    let mut operation = Operation::new(shared, OperationType::PingReq, OperationFlags::empty(), None)?;
    operation.set_packet(shared.serialize(&ControlPacket::PingReq(PingReqPacket {}))?, None);

    shared.send_operation(Arc::new(operation)).await
}
