//! Outbound dial for the connector role.

use std::time::Duration;

use tokio::net::TcpStream;

use super::endpoint::Endpoint;
use crate::error::ChatError;

/// Open a TCP connection to `endpoint`.
///
/// Without a `timeout` the dial is bounded only by the OS default.
///
/// # Errors
///
/// Returns [`ChatError::Connect`] if nobody is listening or the network is
/// unreachable, and [`ChatError::ConnectTimeout`] if `timeout` elapses first.
pub async fn connect(endpoint: &Endpoint, timeout: Option<Duration>) -> Result<TcpStream, ChatError> {
    log::debug!("[Connector] Dialing {}", endpoint);

    let dial = TcpStream::connect(endpoint.as_socket_addr());
    let result = match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, dial).await {
            Ok(result) => result,
            Err(_elapsed) => {
                return Err(ChatError::ConnectTimeout {
                    endpoint: endpoint.clone(),
                    timeout,
                });
            }
        },
        None => dial.await,
    };

    let stream = result.map_err(|source| ChatError::Connect {
        endpoint: endpoint.clone(),
        source,
    })?;

    if let Err(e) = stream.set_nodelay(true) {
        log::warn!("[Connector] Failed to set TCP_NODELAY: {e}");
    }
    log::info!("[Connector] Connected to {}", endpoint);
    Ok(stream)
}
