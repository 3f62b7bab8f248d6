use serde::{Deserialize, Serialize};

/// 节点类型的自描述信息, 供图编辑端展示
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NodeDescriptor {
    pub type_name: String,
    pub name: String,
    pub description: String,
    /// 节点可能选择的出边关系名
    pub relation_types: Vec<String>,
}
