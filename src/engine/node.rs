use crate::types::{NodeDescriptor, NodeFactory};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// 节点类型标签 -> 构造函数的注册表
///
/// 内置节点在引擎启动时注册, 第三方节点通过 `register` 加入同一
/// 映射, 之后即可出现在任意规则链里
pub struct NodeRegistry {
    factories: RwLock<HashMap<String, NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, type_name: &str, factory: NodeFactory) {
        self.factories
            .write()
            .await
            .insert(type_name.to_string(), factory);
    }

    pub async fn get(&self, type_name: &str) -> Option<NodeFactory> {
        self.factories.read().await.get(type_name).cloned()
    }

    /// 所有已注册节点类型的描述信息
    pub async fn descriptors(&self) -> Vec<NodeDescriptor> {
        self.factories
            .read()
            .await
            .values()
            .map(|factory| factory().get_descriptor())
            .collect()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
