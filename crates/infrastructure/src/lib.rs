pub mod codec;
pub mod metrics_forwarder;
pub mod store;
pub mod transport;

pub use codec::*;
pub use metrics_forwarder::*;
pub use store::*;
pub use transport::*;
