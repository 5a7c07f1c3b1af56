//! # Gateway Testing Utils
//!
//! 工作区共享的测试替身与测试数据构造器。
//!
//! ```toml
//! [dev-dependencies]
//! gateway-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
