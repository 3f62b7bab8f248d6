use iotflow_rs::engine::{with_callback, NamedExecutor};
use iotflow_rs::types::RuleError;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

#[derive(Debug)]
enum Outcome {
    Success(u32, Option<String>),
    Failure(RuleError),
}

fn run_bridge(
    executor: &NamedExecutor,
    task: impl FnOnce() -> Result<u32, RuleError> + Send + 'static,
) -> mpsc::Receiver<Outcome> {
    let (tx, rx) = mpsc::channel();
    let tx_err = tx.clone();
    with_callback(
        executor,
        task,
        move |value| {
            let worker = thread::current().name().map(str::to_string);
            let _ = tx.send(Outcome::Success(value, worker));
        },
        move |error| {
            let _ = tx_err.send(Outcome::Failure(error));
        },
    );
    rx
}

#[test]
fn registry_resolves_executors_by_name() {
    use iotflow_rs::engine::{ExecutorConfig, ExecutorRegistry};

    let registry = ExecutorRegistry::new(&ExecutorConfig::default()).expect("创建执行器失败");
    assert!(registry.get(ExecutorRegistry::DISPATCH).is_some());
    assert!(registry.get(ExecutorRegistry::SCRIPT).is_some());
    assert!(registry.get(ExecutorRegistry::CALLBACK).is_some());
    assert!(registry.get("no-such-pool").is_none());
}

#[test]
fn successful_task_invokes_success_exactly_once_off_caller_thread() {
    let executor = NamedExecutor::new("script", 2, 16).expect("创建执行器失败");
    let caller = thread::current().id();

    let (tx, rx) = mpsc::channel();
    let tx_err = tx.clone();
    with_callback(
        &executor,
        || Ok(41 + 1),
        move |value: u32| {
            let _ = tx.send((value, thread::current().id()));
        },
        move |_error| {
            let _ = tx_err.send((0, thread::current().id()));
        },
    );

    let (value, worker) = rx.recv_timeout(Duration::from_secs(5)).expect("回调未触发");
    assert_eq!(value, 42);
    assert_ne!(worker, caller, "回调不允许在提交线程上同步执行");
    assert!(
        rx.recv_timeout(Duration::from_millis(200)).is_err(),
        "回调只允许触发一次"
    );
}

#[test]
fn success_callback_runs_on_the_configured_executor() {
    let executor = NamedExecutor::new("script", 1, 16).expect("创建执行器失败");
    let rx = run_bridge(&executor, || Ok(7));

    match rx.recv_timeout(Duration::from_secs(5)).expect("回调未触发") {
        Outcome::Success(7, Some(name)) => {
            assert!(name.starts_with("iotflow-script"), "线程名: {}", name)
        }
        other => panic!("意外结果: {:?}", other),
    }
}

#[test]
fn failing_task_invokes_failure_only() {
    let executor = NamedExecutor::new("script", 2, 16).expect("创建执行器失败");
    let rx = run_bridge(&executor, || {
        Err(RuleError::EvaluationError("总是失败".to_string()))
    });

    match rx.recv_timeout(Duration::from_secs(5)).expect("回调未触发") {
        Outcome::Failure(RuleError::EvaluationError(_)) => {}
        other => panic!("意外结果: {:?}", other),
    }
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn panicking_task_surfaces_as_failure() {
    let executor = NamedExecutor::new("script", 2, 16).expect("创建执行器失败");
    let rx = run_bridge(&executor, || panic!("节点缺陷"));

    match rx.recv_timeout(Duration::from_secs(5)).expect("回调未触发") {
        Outcome::Failure(RuleError::EvaluationError(_)) => {}
        other => panic!("意外结果: {:?}", other),
    }
}

#[test]
fn saturated_queue_rejects_with_submission_error() {
    // 单线程单许可: 第一个任务占满在途预算
    let executor = NamedExecutor::new("script", 1, 1).expect("创建执行器失败");
    let (gate_tx, gate_rx) = mpsc::channel::<()>();

    let (done_tx, done_rx) = mpsc::channel();
    let done_err = done_tx.clone();
    with_callback(
        &executor,
        move || {
            let _ = gate_rx.recv_timeout(Duration::from_secs(5));
            Ok(1u32)
        },
        move |v| {
            let _ = done_tx.send(v);
        },
        move |_e| {
            let _ = done_err.send(0);
        },
    );

    // 等第一个任务真正拿到许可
    thread::sleep(Duration::from_millis(100));

    let rx = run_bridge(&executor, || Ok(2));
    match rx.recv_timeout(Duration::from_secs(5)).expect("拒绝回调未触发") {
        Outcome::Failure(RuleError::SubmissionError(_)) => {}
        other => panic!("期望 SubmissionError, 实际 {:?}", other),
    }

    let _ = gate_tx.send(());
    assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)), Ok(1));
}

#[test]
fn shut_down_executor_rejects_with_submission_error() {
    let executor = NamedExecutor::new("script", 1, 16).expect("创建执行器失败");
    executor.shutdown();

    let rx = run_bridge(&executor, || Ok(3));
    match rx.recv_timeout(Duration::from_secs(5)).expect("拒绝回调未触发") {
        Outcome::Failure(RuleError::SubmissionError(_)) => {}
        other => panic!("期望 SubmissionError, 实际 {:?}", other),
    }
}
