//! Default transport implementations.

use std::io;
use std::time::Duration;

mod datagram_io;
mod multicast;
mod stream_client;
mod stream_server;

pub use datagram_io::DatagramIoImpl;
pub use multicast::MulticastReceiverImpl;
pub use stream_client::ReqwestStreamClient;
pub use stream_server::WarpStreamServer;

/// Read timeout of blocking receive loops, bounds how long `stop` takes.
pub(crate) const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub(crate) fn is_timeout(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
