use crate::engine::{ExecutorRegistry, NamedExecutor};
use crate::types::{Message, RuleError};
use std::sync::{Arc, Weak};
use tracing::debug;
use uuid::Uuid;

/// 规则链运行时暴露给节点上下文的路由入口
///
/// `tell_next` / `tell_failure` 即时返回, 消息的后续投递在 dispatch
/// 执行器上异步进行, 因此可以在执行器回调线程里安全调用
pub trait MessageRouter: Send + Sync {
    fn tell_next(&self, from: Uuid, msg: Message, relation: &str);
    fn tell_failure(&self, from: Uuid, msg: Message, error: RuleError);
}

/// 节点执行上下文
///
/// 每个节点放置位置一个实例, 由规则链运行时持有并在该节点的所有
/// 调用间复用; 一次 `on_msg` 最终必须恰好触发一次 `tell_next` 或
/// `tell_failure`
#[derive(Clone)]
pub struct NodeContext {
    node_id: Uuid,
    node_type: String,
    chain_id: Uuid,
    executors: Arc<ExecutorRegistry>,
    router: Weak<dyn MessageRouter>,
}

impl NodeContext {
    pub fn new(
        node_id: Uuid,
        node_type: impl Into<String>,
        chain_id: Uuid,
        executors: Arc<ExecutorRegistry>,
        router: Weak<dyn MessageRouter>,
    ) -> Self {
        Self {
            node_id,
            node_type: node_type.into(),
            chain_id,
            executors,
            router,
        }
    }

    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn chain_id(&self) -> Uuid {
        self.chain_id
    }

    pub fn get_executor(&self, name: &str) -> Option<Arc<NamedExecutor>> {
        self.executors.get(name)
    }

    /// 脚本执行器, 与 dispatch 隔离, 慢脚本不会阻塞消息路由
    pub fn script_executor(&self) -> Arc<NamedExecutor> {
        self.executors.script().clone()
    }

    /// 沿指定关系把消息交给后继节点, 结束本节点对该消息的处理
    pub fn tell_next(&self, msg: Message, relation: &str) {
        match self.router.upgrade() {
            Some(router) => router.tell_next(self.node_id, msg, relation),
            None => debug!(
                node_id = %self.node_id,
                "规则链已卸载, 丢弃消息"
            ),
        }
    }

    /// 报告处理失败, 由运行时决定是否沿 Failure 关系继续
    pub fn tell_failure(&self, msg: Message, error: RuleError) {
        match self.router.upgrade() {
            Some(router) => router.tell_failure(self.node_id, msg, error),
            None => debug!(
                node_id = %self.node_id,
                "规则链已卸载, 丢弃失败消息"
            ),
        }
    }
}
