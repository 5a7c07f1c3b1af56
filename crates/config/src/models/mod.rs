pub mod app_config;
pub mod gateway;
pub mod minion;

pub use app_config::*;
pub use gateway::*;
pub use minion::*;
