use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

/// 构建多线程运行时，工作线程按 `{prefix}-{n}` 命名
///
/// 线程序号由工厂实例自己的计数器分配。
pub struct RuntimeFactory {
    name_prefix: String,
    worker_threads: Option<usize>,
    next_thread: Arc<AtomicUsize>,
}

impl RuntimeFactory {
    pub fn new<P: Into<String>>(name_prefix: P) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            worker_threads: None,
            next_thread: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = Some(worker_threads.max(1));
        self
    }

    /// 下一个线程名，序号从0开始递增
    pub fn next_thread_name(&self) -> String {
        thread_name(&self.name_prefix, &self.next_thread)
    }

    pub fn build(&self) -> io::Result<Runtime> {
        let prefix = self.name_prefix.clone();
        let counter = Arc::clone(&self.next_thread);

        let mut builder = Builder::new_multi_thread();
        builder
            .enable_all()
            .thread_name_fn(move || thread_name(&prefix, &counter));
        if let Some(worker_threads) = self.worker_threads {
            builder.worker_threads(worker_threads);
        }
        builder.build()
    }
}

fn thread_name(prefix: &str, counter: &AtomicUsize) -> String {
    format!("{}-{}", prefix, counter.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_names_are_sequential_per_factory() {
        let first = RuntimeFactory::new("gateway");
        let second = RuntimeFactory::new("minion");

        assert_eq!(first.next_thread_name(), "gateway-0");
        assert_eq!(first.next_thread_name(), "gateway-1");
        assert_eq!(second.next_thread_name(), "minion-0");
    }

    #[test]
    fn test_runtime_threads_use_prefix() {
        let factory = RuntimeFactory::new("rt-test").with_worker_threads(2);
        let runtime = factory.build().unwrap();

        let name = runtime.block_on(async {
            tokio::spawn(async { std::thread::current().name().map(str::to_string) })
                .await
                .unwrap()
        });
        assert!(name.unwrap().starts_with("rt-test-"));
    }
}
