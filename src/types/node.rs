use crate::types::{Message, NodeContext, NodeDescriptor, RuleError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// 规则链中的节点定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub type_name: String,
    pub config: Value,
    #[serde(default)]
    pub layout: Position,
    pub chain_id: Uuid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// 节点生命周期契约, 所有节点变体(过滤/转换/动作...)共用
///
/// 状态机: 未初始化 -> `init` -> 就绪 -> 若干次 `on_msg` -> `destroy`。
/// `init` 失败是致命的, 规则链拒绝带着未就绪的节点启动; `destroy`
/// 幂等, 即使 `init` 半途失败也必须可以安全调用。
///
/// `on_msg` 不得阻塞调用线程: 耗时工作(脚本求值, 外部调用)必须经
/// `with_callback` 派发到具名执行器, 并在回调里完成终结调用。每次
/// `on_msg` 最终恰好触发一次 `tell_next` 或 `tell_failure`; 同一节点
/// 上重叠调用的完成顺序不做保证, 节点内部状态须自行保护。
#[async_trait]
pub trait RuleNode: Send + Sync {
    /// 校验配置并准备内部资源, 失败返回 ConfigError
    ///
    /// `prior_state` 为链重载时保留的节点内部状态, 没有则为 None
    fn init(&mut self, config: &Value, prior_state: Option<&Value>) -> Result<(), RuleError>;

    async fn on_msg(&self, ctx: NodeContext, msg: Message);

    /// 释放持有的外部资源(如脚本沙箱), 幂等
    fn destroy(&self) {}

    fn get_descriptor(&self) -> NodeDescriptor;
}

/// 节点类型标签到构造函数的映射项, 新节点类型注册进
/// `NodeRegistry` 而不是依赖反射
pub type NodeFactory = Arc<dyn Fn() -> Box<dyn RuleNode> + Send + Sync>;
