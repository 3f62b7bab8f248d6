use crate::types::RuleError;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

/// 具名工作池, 独立于其他池调度
///
/// 每个池是一个独立的 tokio 多线程运行时, 脚本求值这类阻塞工作
/// 通过 `spawn_blocking` 进入, 不会占住 dispatch 的线程。在途任务
/// 数由信号量限定, 超出即拒绝提交
pub struct NamedExecutor {
    name: String,
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
    permits: Arc<Semaphore>,
    closed: Arc<AtomicBool>,
}

impl NamedExecutor {
    pub fn new(name: &str, threads: usize, queue_capacity: usize) -> Result<Self, RuleError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name(format!("iotflow-{}", name))
            .enable_all()
            .build()
            .map_err(|e| RuleError::ConfigError(format!("创建执行器 {} 失败: {}", name, e)))?;

        Ok(Self {
            name: name.to_string(),
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            permits: Arc::new(Semaphore::new(queue_capacity)),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 提交一个产生值的任务, 完成后恰好回调 on_success / on_failure
    /// 其中之一, 且绝不在提交线程上同步执行
    ///
    /// 任务返回 Err 或 panic 走 on_failure; 执行器已关闭或队列饱和
    /// 时以 SubmissionError 走 on_failure。不做重试, 重试策略由构造
    /// 任务的一方负责
    pub fn execute<T, F, S, E>(&self, task: F, on_success: S, on_failure: E)
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, RuleError> + Send + 'static,
        S: FnOnce(T) + Send + 'static,
        E: FnOnce(RuleError) + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            let error = RuleError::SubmissionError(format!("执行器 {} 已关闭", self.name));
            // 运行时已不可用, 退化到独立线程保证回调仍然异步触发
            std::thread::spawn(move || on_failure(error));
            return;
        }

        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let error = RuleError::SubmissionError(format!("执行器 {} 任务队列已满", self.name));
                self.handle.spawn_blocking(move || on_failure(error));
                return;
            }
        };

        self.handle.spawn_blocking(move || {
            let _permit = permit;
            match std::panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(Ok(value)) => on_success(value),
                Ok(Err(e)) => on_failure(e),
                Err(_) => on_failure(RuleError::EvaluationError(
                    "任务执行发生 panic".to_string(),
                )),
            }
        });
    }

    /// 在本池上运行异步任务, dispatch 池用它投递 on_msg
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// 关闭后拒绝新任务, 已提交的任务继续跑完
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut slot) = self.runtime.lock() {
            if let Some(runtime) = slot.take() {
                debug!(executor = %self.name, "关闭执行器");
                runtime.shutdown_background();
            }
        }
    }
}

impl Drop for NamedExecutor {
    // 运行时必须后台关闭, 执行器可能在异步上下文里被丢弃
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 执行器池的规模配置
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// 消息投递与路由
    pub dispatch_threads: usize,
    /// 脚本求值, 与 dispatch 隔离
    pub script_threads: usize,
    /// 接入层校验回调
    pub callback_threads: usize,
    /// 单个执行器的在途任务上限
    pub queue_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            dispatch_threads: 4,
            script_threads: 2,
            callback_threads: 2,
            queue_capacity: 1024,
        }
    }
}

/// 固定的一组具名执行器, 构建后只读
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<NamedExecutor>>,
    dispatch: Arc<NamedExecutor>,
    script: Arc<NamedExecutor>,
    callback: Arc<NamedExecutor>,
}

impl ExecutorRegistry {
    pub const DISPATCH: &'static str = "dispatch";
    pub const SCRIPT: &'static str = "script";
    pub const CALLBACK: &'static str = "callback";

    pub fn new(config: &ExecutorConfig) -> Result<Self, RuleError> {
        let dispatch = Arc::new(NamedExecutor::new(
            Self::DISPATCH,
            config.dispatch_threads,
            config.queue_capacity,
        )?);
        let script = Arc::new(NamedExecutor::new(
            Self::SCRIPT,
            config.script_threads,
            config.queue_capacity,
        )?);
        let callback = Arc::new(NamedExecutor::new(
            Self::CALLBACK,
            config.callback_threads,
            config.queue_capacity,
        )?);

        let mut executors = HashMap::new();
        executors.insert(Self::DISPATCH.to_string(), dispatch.clone());
        executors.insert(Self::SCRIPT.to_string(), script.clone());
        executors.insert(Self::CALLBACK.to_string(), callback.clone());

        Ok(Self {
            executors,
            dispatch,
            script,
            callback,
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<NamedExecutor>> {
        self.executors.get(name).cloned()
    }

    pub fn dispatch(&self) -> &Arc<NamedExecutor> {
        &self.dispatch
    }

    pub fn script(&self) -> &Arc<NamedExecutor> {
        &self.script
    }

    pub fn callback(&self) -> &Arc<NamedExecutor> {
        &self.callback
    }

    pub fn shutdown(&self) {
        for executor in self.executors.values() {
            executor.shutdown();
        }
    }
}
