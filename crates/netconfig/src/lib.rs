//! Control plane: UDP discovery beacons and the TCP command channel a
//! master controller uses to drive device slaves.

pub mod beacon;
pub mod command;

use thiserror::Error;

pub use beacon::{discover, local_ipv4_addrs, Beacon, DiscoveredDevice};
pub use command::{MasterLink, NetConfigServer};

#[derive(Error, Debug)]
pub enum ControlError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] stream_types::CodecError),
}
