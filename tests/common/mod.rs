#![allow(dead_code)]

use async_trait::async_trait;
use iotflow_rs::engine::{ExecutorConfig, ExecutorRegistry};
use iotflow_rs::types::{
    relation, Message, MessageRouter, NodeContext, NodeDescriptor, NodeFactory, RuleError,
    RuleNode,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// 路由终结调用的记录
#[derive(Debug)]
pub enum Terminal {
    Next { relation: String, msg: Message },
    Failure { error: RuleError, msg: Message },
}

/// 把终结调用写进通道的路由桩, 直接驱动单个节点时使用
pub struct RecordingRouter {
    tx: mpsc::UnboundedSender<Terminal>,
}

impl RecordingRouter {
    pub fn new() -> (Arc<dyn MessageRouter>, mpsc::UnboundedReceiver<Terminal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl MessageRouter for RecordingRouter {
    fn tell_next(&self, _from: Uuid, msg: Message, relation: &str) {
        let _ = self.tx.send(Terminal::Next {
            relation: relation.to_string(),
            msg,
        });
    }

    fn tell_failure(&self, _from: Uuid, msg: Message, error: RuleError) {
        let _ = self.tx.send(Terminal::Failure { error, msg });
    }
}

pub fn executors() -> Arc<ExecutorRegistry> {
    Arc::new(ExecutorRegistry::new(&ExecutorConfig::default()).expect("创建执行器失败"))
}

pub fn node_context(
    executors: &Arc<ExecutorRegistry>,
    router: &Arc<dyn MessageRouter>,
) -> NodeContext {
    NodeContext::new(
        Uuid::new_v4(),
        "test",
        Uuid::new_v4(),
        executors.clone(),
        Arc::downgrade(router),
    )
}

pub async fn recv_terminal(rx: &mut mpsc::UnboundedReceiver<Terminal>) -> Terminal {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("等待终结调用超时")
        .expect("通道已关闭")
}

/// 观察节点: 收到的消息写进通道再沿 Success 转发
pub struct ProbeNode {
    tx: mpsc::UnboundedSender<Message>,
}

#[async_trait]
impl RuleNode for ProbeNode {
    fn init(&mut self, _config: &Value, _prior_state: Option<&Value>) -> Result<(), RuleError> {
        Ok(())
    }

    async fn on_msg(&self, ctx: NodeContext, msg: Message) {
        let _ = self.tx.send(msg.clone());
        ctx.tell_next(msg, relation::SUCCESS);
    }

    fn get_descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_name: "probe".to_string(),
            name: "观察节点".to_string(),
            description: "测试用, 记录流经的消息".to_string(),
            relation_types: vec![relation::SUCCESS.to_string()],
        }
    }
}

pub fn probe_factory(tx: mpsc::UnboundedSender<Message>) -> NodeFactory {
    Arc::new(move || Box::new(ProbeNode { tx: tx.clone() }) as Box<dyn RuleNode>)
}

pub async fn recv_msg(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("等待消息超时")
        .expect("通道已关闭")
}
