use crate::engine::NamedExecutor;
use crate::types::RuleError;

/// 把一个产生值的任务交给具名执行器, 完成后恰好触发一次成功或
/// 失败回调
///
/// 规则节点派发脚本求值与接入服务派发校验工作用的是同一个机制,
/// 两个调用点, 一套契约
pub fn with_callback<T, F, S, E>(executor: &NamedExecutor, task: F, on_success: S, on_failure: E)
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, RuleError> + Send + 'static,
    S: FnOnce(T) + Send + 'static,
    E: FnOnce(RuleError) + Send + 'static,
{
    executor.execute(task, on_success, on_failure);
}

/// 接入层的成功/失败回调对
///
/// 传输适配器构造请求时附带一个回调对, 服务端保证其中之一被触发
/// 恰好一次
pub struct AsyncCallback<T> {
    on_success: Box<dyn FnOnce(T) + Send>,
    on_failure: Box<dyn FnOnce(RuleError) + Send>,
}

impl<T> AsyncCallback<T> {
    pub fn new(
        on_success: impl FnOnce(T) + Send + 'static,
        on_failure: impl FnOnce(RuleError) + Send + 'static,
    ) -> Self {
        Self {
            on_success: Box::new(on_success),
            on_failure: Box::new(on_failure),
        }
    }

    /// 拆成两个单次闭包, 交给 `with_callback` 保证恰好一个被调用
    pub fn split(
        self,
    ) -> (
        Box<dyn FnOnce(T) + Send>,
        Box<dyn FnOnce(RuleError) + Send>,
    ) {
        (self.on_success, self.on_failure)
    }
}
