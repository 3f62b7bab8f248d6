use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone)]
pub enum RuleError {
    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("节点执行失败: {0}")]
    EvaluationError(String),

    #[error("任务提交失败: {0}")]
    SubmissionError(String),

    #[error("传输校验失败: {0}")]
    TransportValidationError(String),

    #[error("找不到节点处理器: {0}")]
    HandlerNotFound(String),

    #[error("规则链未找到: {0}")]
    ChainNotFound(Uuid),

    #[error("找不到根规则链")]
    NoRootChain,
}
