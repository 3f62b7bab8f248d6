use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// 内置消息类型
pub mod msg_type {
    pub const POST_TELEMETRY: &str = "POST_TELEMETRY";
    pub const POST_ATTRIBUTE: &str = "POST_ATTRIBUTE";
    pub const SESSION_EVENT: &str = "SESSION_EVENT";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Device,
    Asset,
    RuleChain,
    RuleNode,
}

/// 消息源实体引用, 路由核心不解释其内容
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId {
    pub entity_type: EntityType,
    pub id: Uuid,
}

impl EntityId {
    pub fn device(id: Uuid) -> Self {
        Self {
            entity_type: EntityType::Device,
            id,
        }
    }

    pub fn rule_chain(id: Uuid) -> Self {
        Self {
            entity_type: EntityType::RuleChain,
            id,
        }
    }

    pub fn rule_node(id: Uuid) -> Self {
        Self {
            entity_type: EntityType::RuleNode,
            id,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}[{}]", self.entity_type, self.id)
    }
}

/// 有序的字符串键值对, 消息的附加上下文
///
/// 元数据本身是值类型: 修改通过复制产生新值, 持有旧消息引用的一方
/// 看到的数据保持不变
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MsgMetadata(BTreeMap<String, String>);

impl MsgMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// 复制出带有新键值的元数据
    pub fn with_value(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.insert(key, value);
        copy
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MsgMetadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// 流经规则链的消息, 构造后不可变
///
/// 节点"修改"消息时派生出新的 Message 值, 未变动的载荷通过 Arc 共享
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    id: Uuid,
    ts: i64,
    msg_type: String,
    originator: EntityId,
    metadata: MsgMetadata,
    data: Arc<Value>,
}

impl Message {
    pub fn new(msg_type: impl Into<String>, originator: EntityId, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts: Utc::now().timestamp_millis(),
            msg_type: msg_type.into(),
            originator,
            metadata: MsgMetadata::new(),
            data: Arc::new(data),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn ts(&self) -> i64 {
        self.ts
    }

    pub fn msg_type(&self) -> &str {
        &self.msg_type
    }

    pub fn originator(&self) -> EntityId {
        self.originator
    }

    pub fn metadata(&self) -> &MsgMetadata {
        &self.metadata
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// 载荷的共享引用, 用于跨线程绑定脚本变量
    pub fn data_shared(&self) -> Arc<Value> {
        self.data.clone()
    }

    /// 派生替换元数据的新消息, 载荷共享
    pub fn with_metadata(&self, metadata: MsgMetadata) -> Self {
        Self {
            metadata,
            data: self.data.clone(),
            msg_type: self.msg_type.clone(),
            ..*self
        }
    }

    /// 派生替换载荷的新消息
    pub fn with_data(&self, data: Value) -> Self {
        Self {
            data: Arc::new(data),
            metadata: self.metadata.clone(),
            msg_type: self.msg_type.clone(),
            ..*self
        }
    }

    /// 派生替换类型的新消息
    pub fn with_type(&self, msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            metadata: self.metadata.clone(),
            data: self.data.clone(),
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn derived_message_leaves_original_untouched() {
        let msg = Message::new(
            msg_type::POST_TELEMETRY,
            EntityId::device(Uuid::new_v4()),
            json!({"temperature": 5}),
        );
        let derived = msg.with_metadata(msg.metadata().with_value("deviceName", "thermo-1"));

        assert!(msg.metadata().is_empty());
        assert_eq!(derived.metadata().get("deviceName"), Some("thermo-1"));
        assert_eq!(derived.id(), msg.id());
        assert_eq!(derived.data(), msg.data());
    }

    #[test]
    fn with_data_keeps_metadata_and_identity() {
        let msg = Message::new(
            msg_type::POST_TELEMETRY,
            EntityId::device(Uuid::new_v4()),
            json!({"temperature": 5}),
        );
        let msg = msg.with_metadata(msg.metadata().with_value("ts", "42"));
        let derived = msg.with_data(json!({"temperature": 6}));

        assert_eq!(msg.data(), &json!({"temperature": 5}));
        assert_eq!(derived.data(), &json!({"temperature": 6}));
        assert_eq!(derived.metadata().get("ts"), Some("42"));
        assert_eq!(derived.id(), msg.id());
    }

    #[test]
    fn metadata_iterates_in_key_order() {
        let meta: MsgMetadata = [("b", "2"), ("a", "1"), ("c", "3")].into_iter().collect();
        let keys: Vec<&str> = meta.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
