//! Minion网关进程的组装层：运行模式、应用启动与优雅关闭

pub mod app;
pub mod shutdown;
