use crate::components::{LogNode, ScriptFilterNode, ScriptTransformNode};
use crate::engine::{ChainRuntime, ExecutorConfig, ExecutorRegistry, NodeRegistry};
use crate::types::{Message, NodeDescriptor, NodeFactory, RuleChain, RuleError, RuleNode};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// 规则引擎: 节点类型注册表 + 已加载的规则链 + 具名执行器
#[derive(Clone)]
pub struct RuleEngine {
    chains: Arc<RwLock<HashMap<Uuid, Arc<ChainRuntime>>>>,
    registry: Arc<NodeRegistry>,
    executors: Arc<ExecutorRegistry>,
    version: Arc<AtomicU64>,
}

impl RuleEngine {
    pub async fn new() -> Result<Self, RuleError> {
        Self::with_config(ExecutorConfig::default()).await
    }

    pub async fn with_config(config: ExecutorConfig) -> Result<Self, RuleError> {
        let registry = Arc::new(NodeRegistry::new());

        // 注册内置组件
        let factories: Vec<(&str, NodeFactory)> = vec![
            (
                "filter",
                Arc::new(|| Box::<ScriptFilterNode>::default() as Box<dyn RuleNode>),
            ),
            (
                "transform_js",
                Arc::new(|| Box::<ScriptTransformNode>::default() as Box<dyn RuleNode>),
            ),
            (
                "log",
                Arc::new(|| Box::<LogNode>::default() as Box<dyn RuleNode>),
            ),
        ];
        for (type_name, factory) in factories {
            registry.register(type_name, factory).await;
        }

        Ok(Self {
            chains: Arc::new(RwLock::new(HashMap::new())),
            registry,
            executors: Arc::new(ExecutorRegistry::new(&config)?),
            version: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn executors(&self) -> &Arc<ExecutorRegistry> {
        &self.executors
    }

    /// 注册自定义节点类型
    pub async fn register_node_type(&self, type_name: &str, factory: NodeFactory) {
        self.registry.register(type_name, factory).await;
    }

    /// 所有已注册的组件类型
    pub async fn get_registered_components(&self) -> Vec<NodeDescriptor> {
        self.registry.descriptors().await
    }

    /// 从 JSON 定义加载规则链, 任一节点配置非法则整链拒绝加载
    pub async fn load_chain(&self, content: &str) -> Result<Uuid, RuleError> {
        let mut chain: RuleChain =
            serde_json::from_str(content).map_err(|e| RuleError::ConfigError(e.to_string()))?;

        // 加载即产生新版本号
        chain.metadata.version = self.version.fetch_add(1, Ordering::SeqCst);
        chain.metadata.updated_at = Utc::now().timestamp_millis();

        let id = chain.id;
        let name = chain.name.clone();
        let runtime = ChainRuntime::build(chain, &self.registry, self.executors.clone()).await?;

        if let Some(previous) = self.chains.write().await.insert(id, runtime) {
            // 重载: 旧实例的节点在这里走完 destroy
            previous.destroy();
        }
        info!(chain_id = %id, chain = %name, "规则链加载完成");
        Ok(id)
    }

    pub async fn load_chain_from_file(&self, path: &str) -> Result<Uuid, RuleError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RuleError::ConfigError(e.to_string()))?;
        self.load_chain(&content).await
    }

    pub async fn get_chain(&self, id: Uuid) -> Option<Arc<ChainRuntime>> {
        self.chains.read().await.get(&id).cloned()
    }

    pub async fn get_loaded_chains(&self) -> Vec<Arc<ChainRuntime>> {
        self.chains.read().await.values().cloned().collect()
    }

    /// 卸载规则链并销毁其全部节点
    pub async fn remove_chain(&self, id: Uuid) -> Result<(), RuleError> {
        let chain = self
            .chains
            .write()
            .await
            .remove(&id)
            .ok_or(RuleError::ChainNotFound(id))?;
        chain.destroy();
        info!(chain_id = %id, "规则链已卸载");
        Ok(())
    }

    /// 把消息提交给指定规则链的入口节点, 提交即返回
    pub async fn process_msg(&self, chain_id: Uuid, msg: Message) -> Result<(), RuleError> {
        let chain = self
            .get_chain(chain_id)
            .await
            .ok_or(RuleError::ChainNotFound(chain_id))?;
        chain.submit(msg)
    }

    /// 接入层产生的消息进根规则链
    pub async fn process_root_msg(&self, msg: Message) -> Result<(), RuleError> {
        let chains = self.chains.read().await;
        let root = chains
            .values()
            .find(|c| c.is_root())
            .ok_or(RuleError::NoRootChain)?;
        root.submit(msg)
    }

    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// 销毁全部规则链并关闭执行器
    pub async fn shutdown(&self) {
        let chains: Vec<_> = self.chains.write().await.drain().collect();
        for (_, chain) in chains {
            chain.destroy();
        }
        self.executors.shutdown();
    }
}
