pub mod encoding;
pub mod identity;
pub mod messages;
pub mod ports;
pub mod results;
pub mod rpc;
pub mod task;
pub mod twin;

pub use identity::*;
pub use messages::*;
pub use ports::*;
pub use results::*;
pub use rpc::*;
pub use task::*;
pub use twin::*;
pub use gateway_errors::{DecodeError, GatewayError, GatewayResult};
