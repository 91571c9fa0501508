use crate::config::AppConfig;
use crate::event::{Event, EventKind};
use crate::sender::ActionSender;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// 事件处理器签名。同类别内按注册顺序依次执行；
/// 返回错误只记录日志，不影响其余处理器和其他连接
pub type EventHandler =
    Arc<dyn Fn(Context) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// 传递给处理器的上下文。事件负载原样转交，核心不做任何修改
#[derive(Clone)]
pub struct Context {
    /// 事件来源的机器人身份
    pub bot_id: String,
    /// 事件类别
    pub kind: EventKind,
    /// 原始事件负载
    pub event: Event,
    /// 动作发送器（插件借此回复消息、调用 API）
    pub sender: ActionSender,
    /// 启动时的配置快照
    pub config: Arc<AppConfig>,
}

/// 按事件类别维护的处理器列表
pub struct HandlerSet {
    handlers: RwLock<HashMap<EventKind, Vec<EventHandler>>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// 注册一个处理器，同类别内保持注册顺序
    pub fn register(&self, kind: EventKind, handler: EventHandler) {
        self.handlers
            .write()
            .unwrap()
            .entry(kind)
            .or_default()
            .push(handler);
    }

    /// 取出某类别当前的处理器快照
    pub fn snapshot(&self, kind: EventKind) -> Vec<EventHandler> {
        self.handlers
            .read()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }
}
