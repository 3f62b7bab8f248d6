use crate::types::{relation, Message, NodeContext, NodeDescriptor, RuleError, RuleNode};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// 支持 ${msg.id} ${msg.type} ${msg.originator} ${msg.<载荷键>}
    /// ${meta.<元数据键>} 占位符, 留空则输出类型加载荷
    #[serde(default)]
    pub template: String,
}

/// 日志节点, 常接在 Failure 分支后输出错误上下文
#[derive(Default)]
pub struct LogNode {
    template: String,
}

impl LogNode {
    fn format_message(&self, msg: &Message) -> String {
        if self.template.is_empty() {
            return format!("{}: {}", msg.msg_type(), msg.data());
        }

        let mut result = self.template.clone();
        result = result.replace("${msg.id}", &msg.id().to_string());
        result = result.replace("${msg.type}", msg.msg_type());
        result = result.replace("${msg.originator}", &msg.originator().to_string());

        for (key, value) in msg.metadata().iter() {
            let placeholder = format!("${{meta.{}}}", key);
            if result.contains(&placeholder) {
                result = result.replace(&placeholder, value);
            }
        }

        if let Some(obj) = msg.data().as_object() {
            for (key, value) in obj {
                let placeholder = format!("${{msg.{}}}", key);
                if result.contains(&placeholder) {
                    result = result.replace(&placeholder, &value.to_string());
                }
            }
        }

        result
    }
}

#[async_trait]
impl RuleNode for LogNode {
    fn init(&mut self, config: &Value, _prior_state: Option<&Value>) -> Result<(), RuleError> {
        let config: LogConfig = serde_json::from_value(config.clone())
            .map_err(|e| RuleError::ConfigError(format!("日志节点配置解析失败: {}", e)))?;
        self.template = config.template;
        Ok(())
    }

    // 格式化是平凡工作, 直接在调用线程上终结
    async fn on_msg(&self, ctx: NodeContext, msg: Message) {
        info!("{}", self.format_message(&msg));
        ctx.tell_next(msg, relation::SUCCESS);
    }

    fn get_descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_name: "log".to_string(),
            name: "日志节点".to_string(),
            description: "输出格式化日志".to_string(),
            relation_types: vec![relation::SUCCESS.to_string()],
        }
    }
}
