//! Discovery beacons. A slave periodically broadcasts its identity over
//! UDP; a master listens for a window and collects the devices it hears.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use stream_types::DeviceIdentity;

use crate::ControlError;

/// Default cadence between beacon datagrams.
pub const BEACON_INTERVAL: Duration = Duration::from_secs(1);

/// A device heard during a discovery window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Source address of the beacon datagram.
    pub from: SocketAddr,
    pub identity: DeviceIdentity,
}

/// Periodic identity broadcaster. Runs until stopped or dropped.
pub struct Beacon {
    task: JoinHandle<()>,
}

impl Beacon {
    /// Broadcast `identity` to `target` every `interval`.
    pub async fn start(
        identity: DeviceIdentity,
        target: SocketAddr,
        interval: Duration,
    ) -> Result<Self, ControlError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.set_broadcast(true)?;
        let payload = identity.encode().into_bytes();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = socket.send_to(&payload, target).await {
                    // Transient (interface down, buffer full); keep going.
                    warn!(error = %e, "beacon send failed");
                }
            }
        });
        debug!(%target, "beacon started");
        Ok(Self { task })
    }

    /// Broadcast on the local subnet at the default cadence.
    pub async fn start_broadcast(identity: DeviceIdentity, port: u16) -> Result<Self, ControlError> {
        let target = SocketAddr::from((Ipv4Addr::BROADCAST, port));
        Self::start(identity, target, BEACON_INTERVAL).await
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for Beacon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Listen on `bind` for one discovery window and return every distinct
/// device heard. Malformed beacons are logged and skipped.
pub async fn discover(
    bind: SocketAddr,
    window: Duration,
) -> Result<Vec<DiscoveredDevice>, ControlError> {
    let socket = UdpSocket::bind(bind).await?;
    let mut devices: Vec<DiscoveredDevice> = Vec::new();
    let mut buf = [0u8; 512];
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        let (len, from) = match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(result) => result?,
            Err(_) => break,
        };
        let text = String::from_utf8_lossy(&buf[..len]);
        match DeviceIdentity::decode(&text) {
            Ok(identity) => {
                if !devices.iter().any(|d| d.from == from) {
                    debug!(%from, model = identity.model.as_str(), "device discovered");
                    devices.push(DiscoveredDevice { from, identity });
                }
            }
            Err(e) => warn!(%from, error = %e, "ignoring malformed beacon"),
        }
    }
    Ok(devices)
}

/// Non-loopback IPv4 addresses of this host, for the beacon payload.
pub fn local_ipv4_addrs() -> Vec<Ipv4Addr> {
    match if_addrs::get_if_addrs() {
        Ok(ifaces) => ifaces
            .into_iter()
            .filter(|i| !i.is_loopback())
            .filter_map(|i| match i.addr {
                if_addrs::IfAddr::V4(v4) => Some(v4.ip),
                _ => None,
            })
            .collect(),
        Err(e) => {
            warn!(error = %e, "interface enumeration failed");
            Vec::new()
        }
    }
}
