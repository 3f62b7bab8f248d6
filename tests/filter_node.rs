mod common;

use common::{executors, node_context, recv_terminal, RecordingRouter, Terminal};
use iotflow_rs::components::ScriptFilterNode;
use iotflow_rs::types::{msg_type, relation, EntityId, Message, RuleError, RuleNode};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn telemetry(data: serde_json::Value) -> Message {
    Message::new(msg_type::POST_TELEMETRY, EntityId::device(Uuid::new_v4()), data)
}

fn filter_node(script: &str) -> ScriptFilterNode {
    let mut node = ScriptFilterNode::default();
    node.init(&json!({ "script": script }), None)
        .expect("初始化失败");
    node
}

#[test_log::test(tokio::test)]
async fn matching_payload_routes_via_true() {
    let executors = executors();
    let (router, mut rx) = RecordingRouter::new();
    let node = filter_node("msg.temperature < 10");

    let ctx = node_context(&executors, &router);
    assert!(ctx.get_executor("script").is_some());

    node.on_msg(ctx, telemetry(json!({"temperature": 5})))
        .await;

    match recv_terminal(&mut rx).await {
        Terminal::Next { relation: r, msg } => {
            assert_eq!(r, relation::TRUE);
            assert_eq!(msg.data(), &json!({"temperature": 5}));
        }
        other => panic!("期望 True 路由, 实际 {:?}", other),
    }
    assert!(rx.try_recv().is_err(), "不应有第二次终结调用");
}

#[test_log::test(tokio::test)]
async fn non_matching_payload_routes_via_false() {
    let executors = executors();
    let (router, mut rx) = RecordingRouter::new();
    let node = filter_node("msg.temperature < 10");

    node.on_msg(
        node_context(&executors, &router),
        telemetry(json!({"temperature": 20})),
    )
    .await;

    match recv_terminal(&mut rx).await {
        Terminal::Next { relation: r, .. } => assert_eq!(r, relation::FALSE),
        other => panic!("期望 False 路由, 实际 {:?}", other),
    }
    assert!(rx.try_recv().is_err());
}

#[test_log::test(tokio::test)]
async fn metadata_binding_decides_the_relation() {
    let executors = executors();
    let (router, mut rx) = RecordingRouter::new();
    let node = filter_node("meta.customerName === 'John'");

    let msg = telemetry(json!({}));
    let john = msg.with_metadata(msg.metadata().with_value("customerName", "John"));
    let jane = msg.with_metadata(msg.metadata().with_value("customerName", "Jane"));

    node.on_msg(node_context(&executors, &router), john).await;
    match recv_terminal(&mut rx).await {
        Terminal::Next { relation: r, .. } => assert_eq!(r, relation::TRUE),
        other => panic!("期望 True 路由, 实际 {:?}", other),
    }

    node.on_msg(node_context(&executors, &router), jane).await;
    match recv_terminal(&mut rx).await {
        Terminal::Next { relation: r, .. } => assert_eq!(r, relation::FALSE),
        other => panic!("期望 False 路由, 实际 {:?}", other),
    }
}

#[test_log::test(tokio::test)]
async fn script_runtime_error_reports_failure_only() {
    let executors = executors();
    let (router, mut rx) = RecordingRouter::new();
    // 载荷里没有 missing, 取子属性抛 TypeError
    let node = filter_node("msg.missing.value > 1");

    node.on_msg(node_context(&executors, &router), telemetry(json!({})))
        .await;

    match recv_terminal(&mut rx).await {
        Terminal::Failure { error, .. } => {
            assert!(matches!(error, RuleError::EvaluationError(_)))
        }
        other => panic!("期望失败上报, 实际 {:?}", other),
    }
    assert!(rx.try_recv().is_err(), "失败后不应再有路由调用");
}

#[test_log::test(tokio::test)]
async fn non_boolean_result_reports_failure() {
    let executors = executors();
    let (router, mut rx) = RecordingRouter::new();
    let node = filter_node("msg.temperature + 1");

    node.on_msg(
        node_context(&executors, &router),
        telemetry(json!({"temperature": 5})),
    )
    .await;

    match recv_terminal(&mut rx).await {
        Terminal::Failure { error, .. } => {
            assert!(matches!(error, RuleError::EvaluationError(_)))
        }
        other => panic!("期望失败上报, 实际 {:?}", other),
    }
}

#[tokio::test]
async fn malformed_script_fails_init_with_config_error() {
    let mut node = ScriptFilterNode::default();
    let result = node.init(&json!({ "script": "msg.temperature <" }), None);
    assert!(matches!(result, Err(RuleError::ConfigError(_))));
    // init 未完成也可以安全销毁
    node.destroy();
}

#[tokio::test]
async fn missing_script_key_is_a_config_error() {
    let mut node = ScriptFilterNode::default();
    let result = node.init(&json!({}), None);
    assert!(matches!(result, Err(RuleError::ConfigError(_))));
}

#[test_log::test(tokio::test)]
async fn destroy_is_idempotent() {
    let node = filter_node("msg.temperature < 10");
    node.destroy();
    node.destroy();

    // 销毁后的调用走失败路径而不是 panic
    let executors = executors();
    let (router, mut rx) = RecordingRouter::new();
    node.on_msg(node_context(&executors, &router), telemetry(json!({})))
        .await;
    match recv_terminal(&mut rx).await {
        Terminal::Failure { .. } => {}
        other => panic!("期望失败上报, 实际 {:?}", other),
    }
}

#[test_log::test(tokio::test)]
async fn overlapping_invocations_each_terminate_exactly_once() {
    let executors = executors();
    let (router, mut rx) = RecordingRouter::new();
    let node = Arc::new(filter_node("msg.seq % 2 === 0"));

    let total = 16usize;
    for seq in 0..total {
        let node = node.clone();
        let ctx = node_context(&executors, &router);
        let msg = telemetry(json!({ "seq": seq }));
        tokio::spawn(async move { node.on_msg(ctx, msg).await });
    }

    let mut trues = 0;
    let mut falses = 0;
    for _ in 0..total {
        match recv_terminal(&mut rx).await {
            Terminal::Next { relation: r, .. } if r == relation::TRUE => trues += 1,
            Terminal::Next { relation: r, .. } if r == relation::FALSE => falses += 1,
            other => panic!("意外的终结调用: {:?}", other),
        }
    }
    assert_eq!(trues, total / 2);
    assert_eq!(falses, total / 2);
    assert!(rx.try_recv().is_err(), "每次调用只允许一次终结调用");
}
