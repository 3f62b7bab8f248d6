use crate::engine::{ExecutorRegistry, NodeRegistry};
use crate::types::{
    relation, Message, MessageRouter, NodeContext, RuleChain, RuleError, RuleNode,
    ERROR_METADATA_KEY,
};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// 单条规则链的运行时: 只读图 + 已初始化的节点实例 + 各节点上下文
///
/// 图拓扑在遍历期间只读; 节点实例归运行时所有, 节点上下文在该
/// 节点的所有调用间复用。跨节点顺序沿单条路径是因果的, 同一关系
/// 扇出到多个目标节点之间不保证顺序
pub struct ChainRuntime {
    chain: RuleChain,
    nodes: HashMap<Uuid, Arc<dyn RuleNode>>,
    contexts: HashMap<Uuid, NodeContext>,
    executors: Arc<ExecutorRegistry>,
}

impl ChainRuntime {
    /// 按定义构建并初始化全部节点, 任一节点 ConfigError 即整链拒绝
    /// 启动, 已建好的节点会被销毁
    pub async fn build(
        chain: RuleChain,
        registry: &NodeRegistry,
        executors: Arc<ExecutorRegistry>,
    ) -> Result<Arc<Self>, RuleError> {
        chain.validate()?;

        let mut nodes: HashMap<Uuid, Arc<dyn RuleNode>> = HashMap::new();
        for def in &chain.nodes {
            let factory = registry
                .get(&def.type_name)
                .await
                .ok_or_else(|| RuleError::HandlerNotFound(def.type_name.clone()))?;
            let mut handler = factory();
            if let Err(e) = handler.init(&def.config, None) {
                // init 半途失败也要释放已持有的资源
                handler.destroy();
                for built in nodes.values() {
                    built.destroy();
                }
                return Err(e);
            }
            nodes.insert(def.id, Arc::from(handler));
        }

        Ok(Arc::new_cyclic(|weak: &Weak<ChainRuntime>| {
            let contexts = chain
                .nodes
                .iter()
                .map(|def| {
                    let router: Weak<dyn MessageRouter> = weak.clone();
                    (
                        def.id,
                        NodeContext::new(
                            def.id,
                            def.type_name.clone(),
                            chain.id,
                            executors.clone(),
                            router,
                        ),
                    )
                })
                .collect();

            Self {
                chain,
                nodes,
                contexts,
                executors,
            }
        }))
    }

    pub fn id(&self) -> Uuid {
        self.chain.id
    }

    pub fn name(&self) -> &str {
        &self.chain.name
    }

    pub fn is_root(&self) -> bool {
        self.chain.root
    }

    pub fn definition(&self) -> &RuleChain {
        &self.chain
    }

    /// 把消息交给入口节点, 提交即返回, 遍历异步进行
    pub fn submit(&self, msg: Message) -> Result<(), RuleError> {
        let entry = self
            .chain
            .first_node()
            .ok_or_else(|| RuleError::ConfigError("规则链没有节点".to_string()))?;
        self.deliver(entry.id, msg);
        Ok(())
    }

    /// 卸载时销毁全部节点, 幂等
    pub fn destroy(&self) {
        for node in self.nodes.values() {
            node.destroy();
        }
    }

    /// 在 dispatch 执行器上调用目标节点的 on_msg
    ///
    /// 节点逃逸出来的 panic 在这里兜住并转成 tell_failure, 单个
    /// 出错节点不能拖垮 dispatch 池
    fn deliver(&self, node_id: Uuid, msg: Message) {
        let Some(node) = self.nodes.get(&node_id).cloned() else {
            warn!(node_id = %node_id, "目标节点不存在, 丢弃消息");
            return;
        };
        let Some(ctx) = self.contexts.get(&node_id).cloned() else {
            warn!(node_id = %node_id, "目标节点没有上下文, 丢弃消息");
            return;
        };

        self.executors.dispatch().spawn(async move {
            let outcome = AssertUnwindSafe(node.on_msg(ctx.clone(), msg.clone()))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                ctx.tell_failure(
                    msg,
                    RuleError::EvaluationError("节点执行发生 panic".to_string()),
                );
            }
        });
    }
}

impl MessageRouter for ChainRuntime {
    fn tell_next(&self, from: Uuid, msg: Message, relation_name: &str) {
        let targets = self.chain.outbound(from, relation_name);
        if targets.is_empty() {
            trace!(
                chain = %self.chain.name,
                node_id = %from,
                relation = relation_name,
                "没有后继节点, 消息处理结束"
            );
            return;
        }

        trace!(
            chain = %self.chain.name,
            node_id = %from,
            relation = relation_name,
            fanout = targets.len(),
            "消息路由到后继节点"
        );
        for target in targets {
            self.deliver(target, msg.clone());
        }
    }

    fn tell_failure(&self, from: Uuid, msg: Message, error: RuleError) {
        let targets = self.chain.outbound(from, relation::FAILURE);
        if targets.is_empty() {
            warn!(
                chain = %self.chain.name,
                node_id = %from,
                error = %error,
                "节点处理失败且没有 Failure 分支, 终止本条消息的遍历"
            );
            return;
        }

        debug!(
            chain = %self.chain.name,
            node_id = %from,
            error = %error,
            "节点处理失败, 沿 Failure 分支继续"
        );
        // 原始消息附上错误上下文, 下游的记录类节点可以读取
        let msg = msg.with_metadata(
            msg.metadata()
                .with_value(ERROR_METADATA_KEY, error.to_string()),
        );
        for target in targets {
            self.deliver(target, msg.clone());
        }
    }
}
