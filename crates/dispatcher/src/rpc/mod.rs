//! 网关到Minion的RPC

pub mod correlator;
pub mod router;

pub use correlator::{ResponseReceiver, RpcResponseCorrelator};
pub use router::{ResponseFuture, RpcRouter};
