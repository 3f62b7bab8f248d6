use crate::engine::{with_callback, AsyncCallback, RuleEngine};
use crate::types::{msg_type, EntityId, Message, MsgMetadata, RuleError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// 设备身份与权限信息, 校验成功后返回给传输适配器
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: Uuid,
    pub name: String,
    pub device_type: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateDeviceTokenRequest {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateDeviceTokenResponse {
    pub device: DeviceInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEventKind {
    Open,
    Close,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEventRequest {
    pub session_id: Uuid,
    /// 会话所属设备, 由适配器在校验成功后填入
    pub device: DeviceInfo,
    pub event: SessionEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostTelemetryRequest {
    pub session_id: Uuid,
    /// 设备侧采样时间戳, 不填则以服务端时间为准
    pub ts: Option<i64>,
    pub values: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostAttributeRequest {
    pub session_id: Uuid,
    pub attributes: Value,
}

/// 面向传输适配器的异步接入口
///
/// 四种请求共用一套回调纪律: 校验与处理在 callback 执行器上进行,
/// 提交即返回, 成功/失败回调恰好触发其中之一, 恰好一次。校验失败
/// 只回给发起请求的传输会话, 不影响其他在途消息
pub trait TransportService: Send + Sync {
    fn validate_device_token(
        &self,
        request: ValidateDeviceTokenRequest,
        callback: AsyncCallback<ValidateDeviceTokenResponse>,
    );

    fn session_event(&self, request: SessionEventRequest, callback: AsyncCallback<()>);

    fn post_telemetry(&self, request: PostTelemetryRequest, callback: AsyncCallback<()>);

    fn post_attribute(&self, request: PostAttributeRequest, callback: AsyncCallback<()>);
}

/// 进程内实现: 内存设备表 + 会话表, 校验通过的遥测/属性上报
/// 构造成 Message 投给根规则链
///
/// 设备凭据的真实存储是外部协作方, 这里的注册表只承担其接口角色
pub struct LocalTransportService {
    engine: Arc<RuleEngine>,
    devices: Arc<RwLock<HashMap<String, DeviceInfo>>>,
    sessions: Arc<RwLock<HashMap<Uuid, DeviceInfo>>>,
}

impl LocalTransportService {
    pub fn new(engine: Arc<RuleEngine>) -> Self {
        Self {
            engine,
            devices: Arc::new(RwLock::new(HashMap::new())),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 录入设备凭据, token 即接入令牌
    pub fn register_device(&self, token: impl Into<String>, device: DeviceInfo) {
        self.devices
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(token.into(), device);
    }

    /// 解析会话并把事件体组装成消息, 在 callback 执行器上运行
    fn build_session_msg(
        sessions: &Arc<RwLock<HashMap<Uuid, DeviceInfo>>>,
        session_id: Uuid,
        msg_type_name: &str,
        ts: Option<i64>,
        data: Value,
    ) -> Result<Message, RuleError> {
        let device = sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&session_id)
            .cloned()
            .ok_or_else(|| {
                RuleError::TransportValidationError(format!("会话不存在: {}", session_id))
            })?;

        let msg = Message::new(msg_type_name, EntityId::device(device.device_id), data);
        let mut meta = MsgMetadata::new();
        meta.insert("deviceName", device.name);
        meta.insert("deviceType", device.device_type);
        meta.insert("ts", ts.unwrap_or_else(|| msg.ts()).to_string());
        Ok(msg.with_metadata(meta))
    }

    /// 校验完成后把消息交给根规则链, 接入契约到回调触发为止,
    /// 链上的失败由规则图自行消化
    fn submit_to_root(engine: Arc<RuleEngine>, msg: Message) {
        let dispatch = engine.executors().dispatch().clone();
        dispatch.spawn(async move {
            if let Err(e) = engine.process_root_msg(msg).await {
                warn!(error = %e, "消息进入根规则链失败");
            }
        });
    }
}

impl TransportService for LocalTransportService {
    fn validate_device_token(
        &self,
        request: ValidateDeviceTokenRequest,
        callback: AsyncCallback<ValidateDeviceTokenResponse>,
    ) {
        let devices = self.devices.clone();
        let (on_success, on_failure) = callback.split();
        with_callback(
            self.engine.executors().callback(),
            move || {
                let devices = devices
                    .read()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                match devices.get(&request.token) {
                    None => Err(RuleError::TransportValidationError(
                        "无效的设备令牌".to_string(),
                    )),
                    Some(device) if !device.enabled => Err(RuleError::TransportValidationError(
                        format!("设备已被禁用: {}", device.name),
                    )),
                    Some(device) => Ok(ValidateDeviceTokenResponse {
                        device: device.clone(),
                    }),
                }
            },
            on_success,
            on_failure,
        );
    }

    fn session_event(&self, request: SessionEventRequest, callback: AsyncCallback<()>) {
        let sessions = self.sessions.clone();
        let (on_success, on_failure) = callback.split();
        with_callback(
            self.engine.executors().callback(),
            move || {
                let mut sessions = sessions
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                match request.event {
                    SessionEventKind::Open => {
                        if !request.device.enabled {
                            return Err(RuleError::TransportValidationError(format!(
                                "设备已被禁用: {}",
                                request.device.name
                            )));
                        }
                        info!(
                            session_id = %request.session_id,
                            device = %request.device.name,
                            "会话建立"
                        );
                        sessions.insert(request.session_id, request.device);
                    }
                    SessionEventKind::Close => {
                        info!(session_id = %request.session_id, "会话关闭");
                        sessions.remove(&request.session_id);
                    }
                }
                Ok(())
            },
            on_success,
            on_failure,
        );
    }

    fn post_telemetry(&self, request: PostTelemetryRequest, callback: AsyncCallback<()>) {
        let sessions = self.sessions.clone();
        let engine = self.engine.clone();
        let (on_success, on_failure) = callback.split();
        with_callback(
            self.engine.executors().callback(),
            move || {
                let msg = Self::build_session_msg(
                    &sessions,
                    request.session_id,
                    msg_type::POST_TELEMETRY,
                    request.ts,
                    request.values,
                )?;
                Self::submit_to_root(engine, msg);
                Ok(())
            },
            on_success,
            on_failure,
        );
    }

    fn post_attribute(&self, request: PostAttributeRequest, callback: AsyncCallback<()>) {
        let sessions = self.sessions.clone();
        let engine = self.engine.clone();
        let (on_success, on_failure) = callback.split();
        with_callback(
            self.engine.executors().callback(),
            move || {
                let msg = Self::build_session_msg(
                    &sessions,
                    request.session_id,
                    msg_type::POST_ATTRIBUTE,
                    None,
                    request.attributes,
                )?;
                Self::submit_to_root(engine, msg);
                Ok(())
            },
            on_success,
            on_failure,
        );
    }
}
