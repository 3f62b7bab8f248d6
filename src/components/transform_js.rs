use crate::engine::{with_callback, JsSandbox, DEFAULT_SCRIPT_TIMEOUT_MS};
use crate::types::{relation, Message, NodeContext, NodeDescriptor, RuleError, RuleNode};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptTransformConfig {
    /// 完整的函数体, 自带 return, 如 `return { value: msg.value + 1 };`
    pub script: String,
    /// 派生消息的类型, 不填则沿用原类型
    pub output_type: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_SCRIPT_TIMEOUT_MS
}

/// JS 转换节点: 求值产生新载荷, 派生消息走 Success 关系
///
/// 原消息不被改动, 持有它引用的一方看到的数据不变
pub struct ScriptTransformNode {
    sandbox: Mutex<Option<Arc<JsSandbox>>>,
    output_type: Option<String>,
}

impl Default for ScriptTransformNode {
    fn default() -> Self {
        Self {
            sandbox: Mutex::new(None),
            output_type: None,
        }
    }
}

#[async_trait]
impl RuleNode for ScriptTransformNode {
    fn init(&mut self, config: &Value, _prior_state: Option<&Value>) -> Result<(), RuleError> {
        let config: ScriptTransformConfig = serde_json::from_value(config.clone())
            .map_err(|e| RuleError::ConfigError(format!("转换器配置解析失败: {}", e)))?;
        let sandbox = JsSandbox::compile_transform(
            &config.script,
            Duration::from_millis(config.timeout_ms),
        )?;
        self.sandbox = Mutex::new(Some(Arc::new(sandbox)));
        self.output_type = config.output_type;
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

        let payload = msg.data_shared();
        let meta = msg.metadata().clone();
        let executor = ctx.script_executor();
        let output_type = self.output_type.clone();

        let ok_ctx = ctx.clone();
        let ok_msg = msg.clone();
        with_callback(
            &executor,
            move || sandbox.evaluate_transform(&payload, &meta),
            move |data| {
                let mut derived = ok_msg.with_data(data);
                if let Some(msg_type) = output_type {
                    derived = derived.with_type(msg_type);
                }
                ok_ctx.tell_next(derived, relation::SUCCESS);
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
            type_name: "transform_js".to_string(),
            name: "JS转换器".to_string(),
            description: "使用JavaScript转换消息载荷".to_string(),
            relation_types: vec![
                relation::SUCCESS.to_string(),
                relation::FAILURE.to_string(),
            ],
        }
    }
}
