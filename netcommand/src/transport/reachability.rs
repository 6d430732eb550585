//! TCP reachability polling for devices that are rebooting.

use std::time::Duration;

use log::{debug, info};
use tokio::net::TcpStream;
use tokio::time::Instant;

use super::config::ReconnectPolicy;

/// Check whether a TCP connection to `host:port` can be opened.
pub async fn is_reachable(host: &str, port: u16, probe_timeout: Duration) -> bool {
    match tokio::time::timeout(probe_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!("{}:{} not reachable: {}", host, port, e);
            false
        }
        Err(_) => {
            debug!("{}:{} probe timed out after {:?}", host, port, probe_timeout);
            false
        }
    }
}

/// Poll `host:port` until it accepts connections or `deadline` passes.
///
/// Returns `false` if the deadline passed first.
pub async fn wait_reachable(
    host: &str,
    port: u16,
    deadline: Instant,
    policy: &ReconnectPolicy,
) -> bool {
    let mut round: u32 = 0;
    loop {
        if is_reachable(host, port, policy.probe_timeout).await {
            info!("Connection to {}:{} is open", host, port);
            return true;
        }
        if Instant::now() + policy.retry_interval >= deadline {
            return false;
        }
        if round % 5 == 0 {
            info!("Waiting for {}:{} to respond", host, port);
        }
        round += 1;
        tokio::time::sleep(policy.retry_interval).await;
    }
}
