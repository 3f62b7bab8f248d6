mod context;
mod descriptor;
mod error;
mod message;
mod node;

pub use context::*;
pub use descriptor::*;
pub use error::*;
pub use message::*;
pub use node::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// 节点路由使用的内置关系名
pub mod relation {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const SUCCESS: &str = "Success";
    pub const FAILURE: &str = "Failure";
}

/// 沿 Failure 关系继续时, 错误信息写入该元数据键
pub const ERROR_METADATA_KEY: &str = "error";

// 规则链定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleChain {
    pub id: Uuid,
    pub name: String,
    pub root: bool,
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
    pub metadata: ChainMetadata,
}

// 连接定义, type_name 即关系名
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub from_id: Uuid,
    pub to_id: Uuid,
    pub type_name: String,
}

// 规则链元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainMetadata {
    pub version: u64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl RuleChain {
    /// 消息进入规则链的入口节点
    pub fn first_node(&self) -> Option<&Node> {
        self.nodes.first()
    }

    /// 指定节点沿指定关系的所有出边目标
    pub fn outbound(&self, from: Uuid, relation: &str) -> Vec<Uuid> {
        self.connections
            .iter()
            .filter(|conn| conn.from_id == from && conn.type_name == relation)
            .map(|conn| conn.to_id)
            .collect()
    }

    /// 加载时的结构校验, 遍历期间图保持只读
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.nodes.is_empty() {
            return Err(RuleError::ConfigError("规则链没有节点".to_string()));
        }

        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id) {
                return Err(RuleError::ConfigError(format!(
                    "节点 ID 重复: {}",
                    node.id
                )));
            }
        }

        for conn in &self.connections {
            if conn.type_name.is_empty() {
                return Err(RuleError::ConfigError(format!(
                    "连接 {} -> {} 缺少关系名",
                    conn.from_id, conn.to_id
                )));
            }
            if !ids.contains(&conn.from_id) || !ids.contains(&conn.to_id) {
                return Err(RuleError::ConfigError(format!(
                    "连接引用了不存在的节点: {} -> {}",
                    conn.from_id, conn.to_id
                )));
            }
        }

        Ok(())
    }
}
