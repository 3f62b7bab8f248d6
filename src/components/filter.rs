use crate::engine::{with_callback, JsSandbox, DEFAULT_SCRIPT_TIMEOUT_MS};
use crate::types::{relation, Message, NodeContext, NodeDescriptor, RuleError, RuleNode};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptFilterConfig {
    /// 对每条消息求值为布尔的 JS 表达式, `msg` 访问载荷,
    /// `meta` 访问元数据, 如 `msg.temperature < 10`
    pub script: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_SCRIPT_TIMEOUT_MS
}

/// 脚本过滤节点, 节点契约的典型样例
///
/// `init` 编译脚本, 编译失败即 ConfigError, 链拒绝启动; `on_msg`
/// 把求值派发到脚本执行器, 结果为 true 走 True 关系, false 走
/// False 关系, 脚本抛错/超时/返回非布尔走 tell_failure
pub struct ScriptFilterNode {
    sandbox: Mutex<Option<Arc<JsSandbox>>>,
}

impl Default for ScriptFilterNode {
    fn default() -> Self {
        Self {
            sandbox: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RuleNode for ScriptFilterNode {
    fn init(&mut self, config: &Value, _prior_state: Option<&Value>) -> Result<(), RuleError> {
        let config: ScriptFilterConfig = serde_json::from_value(config.clone())
            .map_err(|e| RuleError::ConfigError(format!("过滤器配置解析失败: {}", e)))?;
        let sandbox = JsSandbox::compile_filter(
            &config.script,
            Duration::from_millis(config.timeout_ms),
        )?;
        self.sandbox = Mutex::new(Some(Arc::new(sandbox)));
        Ok(())
    }

    async fn on_msg(&self, ctx: NodeContext, msg: Message) {
        let sandbox = self
            .sandbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let Some(sandbox) = sandbox else {
            ctx.tell_failure(msg, RuleError::EvaluationError("节点未初始化".to_string()));
            return;
        };

        // 载荷与元数据以快照形式进入脚本绑定
        let payload = msg.data_shared();
        let meta = msg.metadata().clone();
        let executor = ctx.script_executor();

        let ok_ctx = ctx.clone();
        let ok_msg = msg.clone();
        with_callback(
            &executor,
            move || sandbox.evaluate_filter(&payload, &meta),
            move |matched| {
                let relation_name = if matched {
                    relation::TRUE
                } else {
                    relation::FALSE
                };
                ok_ctx.tell_next(ok_msg, relation_name);
            },
            move |error| ctx.tell_failure(msg, error),
        );
    }

    fn destroy(&self) {
        let mut slot = self
            .sandbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(sandbox) = slot.take() {
            debug!(script = %sandbox.fingerprint(), "释放脚本沙箱");
        }
    }

    fn get_descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_name: "filter".to_string(),
            name: "脚本过滤器".to_string(),
            description: "用 JS 条件过滤消息, True/False 两条出边".to_string(),
            relation_types: vec![
                relation::TRUE.to_string(),
                relation::FALSE.to_string(),
                relation::FAILURE.to_string(),
            ],
        }
    }
}
