// lib.rs
//
// ================================================================================
// Mashiro Gateway — OneBot 反向 WebSocket 网关
//
// 架构：连接注册表 | 分类分发管线 | 动作发送器 | 有限重试的监听生命周期
// ================================================================================

pub mod config;
pub mod event;
pub mod framer;
pub mod gateway;
pub mod handlers;
pub mod log;
pub mod registry;
pub mod sender;

pub use config::{AppConfig, FilterPolicy};
pub use event::{Event, EventKind, InboundEvent, MessageView};
pub use gateway::{Gateway, GatewayError};
pub use handlers::{Context, EventHandler, HandlerError, HandlerSet};
pub use registry::{BotId, Connection, Registry, TraitSink};
pub use sender::{ActionSender, MediaKind};
