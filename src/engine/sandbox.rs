use crate::types::{MsgMetadata, RuleError};
use rquickjs::{Context, Runtime};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// 单次求值的内存上限
const MEMORY_LIMIT: usize = 16 * 1024 * 1024;
/// 脚本栈上限
const STACK_LIMIT: usize = 512 * 1024;
/// 未配置时的墙钟超时
pub const DEFAULT_SCRIPT_TIMEOUT_MS: u64 = 2000;

/// 绑定单个脚本的隔离求值环境
///
/// 一个沙箱独占一个 QuickJS 运行时, 由创建它的节点实例独占持有。
/// 脚本在 `compile_*` 时包装成函数定义进上下文, 语法错误在这里
/// 以 ConfigError 暴露; 求值是 (脚本, 绑定) 的纯函数, `msg` 与
/// `meta` 以 JSON 快照绑定, 不是消息内部数据的活引用。
///
/// 超时通过中断回调强制, 连同内存/栈预算一起在沙箱边界内兜住
/// 失控脚本, 超限作为 EvaluationError 走正常失败路径。求值由内部
/// 锁串行化。
pub struct JsSandbox {
    context: Context,
    _runtime: Runtime,
    fingerprint: String,
    epoch: Instant,
    deadline_ms: Arc<AtomicU64>,
    timeout: Duration,
    eval_lock: Mutex<()>,
}

impl JsSandbox {
    /// 编译过滤表达式, 如 `msg.temperature < 10`
    pub fn compile_filter(script: &str, timeout: Duration) -> Result<Self, RuleError> {
        let declaration = format!("const __eval = (msg, meta) => {{ return {}\n; }};", script);
        Self::compile(script, &declaration, timeout)
    }

    /// 编译转换函数体, 脚本自带 return, 如 `return {{ value: msg.value + 1 }};`
    pub fn compile_transform(script: &str, timeout: Duration) -> Result<Self, RuleError> {
        let declaration = format!("const __eval = (msg, meta) => {{\n{}\n}};", script);
        Self::compile(script, &declaration, timeout)
    }

    fn compile(script: &str, declaration: &str, timeout: Duration) -> Result<Self, RuleError> {
        let runtime = Runtime::new()
            .map_err(|e| RuleError::ConfigError(format!("创建脚本运行时失败: {}", e)))?;
        runtime.set_memory_limit(MEMORY_LIMIT);
        runtime.set_max_stack_size(STACK_LIMIT);

        let epoch = Instant::now();
        let deadline_ms = Arc::new(AtomicU64::new(u64::MAX));
        {
            let deadline_ms = deadline_ms.clone();
            runtime.set_interrupt_handler(Some(Box::new(move || {
                epoch.elapsed().as_millis() as u64 > deadline_ms.load(Ordering::Relaxed)
            })));
        }

        let context = Context::full(&runtime)
            .map_err(|e| RuleError::ConfigError(format!("创建脚本上下文失败: {}", e)))?;

        context
            .with(|ctx| ctx.eval::<(), _>(declaration.to_string()))
            .map_err(|e| RuleError::ConfigError(format!("脚本编译失败: {}", e)))?;

        let fingerprint = blake3::hash(script.as_bytes()).to_hex().as_str()[..8].to_string();
        debug!(script = %fingerprint, "脚本编译完成");

        Ok(Self {
            context,
            _runtime: runtime,
            fingerprint,
            epoch,
            deadline_ms,
            timeout,
            eval_lock: Mutex::new(()),
        })
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// 以布尔结果求值, 返回非布尔值视为失败
    pub fn evaluate_filter(&self, msg: &Value, meta: &MsgMetadata) -> Result<bool, RuleError> {
        let call = self.build_call(msg, meta)?;
        self.guarded_eval(|context| {
            context.with(|ctx| -> Result<bool, RuleError> {
                let value: rquickjs::Value = ctx
                    .eval(call)
                    .map_err(|e| RuleError::EvaluationError(format!("脚本执行错误: {}", e)))?;
                value.as_bool().ok_or_else(|| {
                    RuleError::EvaluationError("脚本必须返回布尔值".to_string())
                })
            })
        })
    }

    /// 以结构化数据求值, 结果经 JSON 序列化取回
    pub fn evaluate_transform(&self, msg: &Value, meta: &MsgMetadata) -> Result<Value, RuleError> {
        let call = format!("JSON.stringify({})", self.build_call(msg, meta)?);
        self.guarded_eval(|context| {
            context.with(|ctx| -> Result<Value, RuleError> {
                let text: String = ctx.eval(call).map_err(|e| {
                    RuleError::EvaluationError(format!("脚本执行错误: {}", e))
                })?;
                serde_json::from_str(&text).map_err(|e| {
                    RuleError::EvaluationError(format!("脚本结果解析失败: {}", e))
                })
            })
        })
    }

    fn build_call(&self, msg: &Value, meta: &MsgMetadata) -> Result<String, RuleError> {
        let msg_json = serde_json::to_string(msg)
            .map_err(|e| RuleError::EvaluationError(format!("载荷序列化失败: {}", e)))?;
        let meta_json = serde_json::to_string(meta)
            .map_err(|e| RuleError::EvaluationError(format!("元数据序列化失败: {}", e)))?;
        Ok(format!("__eval({}, {})", msg_json, meta_json))
    }

    /// 串行化求值并在前后布防/撤防超时
    fn guarded_eval<T>(
        &self,
        eval: impl FnOnce(&Context) -> Result<T, RuleError>,
    ) -> Result<T, RuleError> {
        let _guard = self
            .eval_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let deadline = self.epoch.elapsed().as_millis() as u64 + self.timeout.as_millis() as u64;
        self.deadline_ms.store(deadline, Ordering::Relaxed);

        let result = eval(&self.context);

        let expired = self.epoch.elapsed().as_millis() as u64 > deadline;
        self.deadline_ms.store(u64::MAX, Ordering::Relaxed);

        match result {
            Err(_) if expired => Err(RuleError::EvaluationError(format!(
                "脚本执行超过 {} ms",
                self.timeout.as_millis()
            ))),
            other => other,
        }
    }
}
