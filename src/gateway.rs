use crate::config::AppConfig;
use crate::event::{self, EventKind, InboundEvent, MessageView};
use crate::framer::{self, Inbound};
use crate::handlers::{Context, EventHandler, HandlerSet};
use crate::registry::{Connection, Registry};
use crate::sender::ActionSender;
use crate::{debug, error, info, warn};
use futures_util::StreamExt;
use http::StatusCode;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_util::sync::CancellationToken;

/// 重启的有限重试参数。次数用尽后网关保持停止
const RESTART_ATTEMPTS: u32 = 3;
const RESTART_DELAY: Duration = Duration::from_millis(500);

/// 网关生命周期错误
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// 监听地址绑定失败（端口被占用或无权限）
    #[error("端口被占用或无权限: {0}")]
    Bind(#[source] std::io::Error),
}

/// 贯穿接入/分发管线的共享状态
#[derive(Clone)]
struct Shared {
    config: Arc<AppConfig>,
    registry: Arc<Registry>,
    handlers: Arc<HandlerSet>,
    sender: ActionSender,
}

/// 受生命周期锁保护的监听状态
struct Lifecycle {
    cancel: Option<CancellationToken>,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

/// 网关主体：持有监听生命周期、连接注册表与事件分发管线
///
/// 显式构造、显式传递，不提供全局单例；测试中可同时运行多个实例
pub struct Gateway {
    shared: Shared,
    lifecycle: AsyncMutex<Lifecycle>,
}

impl Gateway {
    pub fn new(config: AppConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let sender = ActionSender::new(registry.clone());
        Self {
            shared: Shared {
                config: Arc::new(config),
                registry,
                handlers: Arc::new(HandlerSet::new()),
                sender,
            },
            lifecycle: AsyncMutex::new(Lifecycle {
                cancel: None,
                accept_task: None,
                local_addr: None,
            }),
        }
    }

    /// 获取动作发送器（可自由克隆、跨任务使用）
    pub fn sender(&self) -> ActionSender {
        self.shared.sender.clone()
    }

    /// 当前在线的机器人身份快照（供仪表盘等只读使用）
    pub fn online_bots(&self) -> Vec<String> {
        self.shared.registry.ids()
    }

    /// 实际监听地址（配置端口为 0 时由系统分配）
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.lock().await.local_addr
    }

    pub async fn is_running(&self) -> bool {
        self.lifecycle.lock().await.cancel.is_some()
    }

    // ================== 处理器注册 ==================

    pub fn register(&self, kind: EventKind, handler: EventHandler) {
        self.shared.handlers.register(kind, handler);
    }

    /// 注册群消息处理器
    pub fn on_group_message(&self, handler: EventHandler) {
        self.register(EventKind::GroupMessage, handler);
    }

    /// 注册私聊消息处理器
    pub fn on_private_message(&self, handler: EventHandler) {
        self.register(EventKind::PrivateMessage, handler);
    }

    /// 注册通知事件处理器
    pub fn on_notice(&self, handler: EventHandler) {
        self.register(EventKind::Notice, handler);
    }

    /// 注册请求事件处理器
    pub fn on_request(&self, handler: EventHandler) {
        self.register(EventKind::Request, handler);
    }

    /// 注册元事件处理器（心跳等基础设施事件）
    pub fn on_meta_event(&self, handler: EventHandler) {
        self.register(EventKind::MetaEvent, handler);
    }

    /// 注册 API 响应处理器
    pub fn on_api_response(&self, handler: EventHandler) {
        self.register(EventKind::ApiResponse, handler);
    }

    /// 注册兜底处理器（未知上报类型）
    pub fn on_unrecognized(&self, handler: EventHandler) {
        self.register(EventKind::Unrecognized, handler);
    }

    // ================== 生命周期 ==================

    /// 启动监听。地址被占用时立即返回 Bind 错误，本方法不做重试
    pub async fn start(&self) -> Result<(), GatewayError> {
        let mut life = self.lifecycle.lock().await;
        self.start_locked(&mut life).await
    }

    async fn start_locked(&self, life: &mut Lifecycle) -> Result<(), GatewayError> {
        if life.cancel.is_some() {
            return Ok(());
        }

        let listener = TcpListener::bind(self.shared.config.listen.as_str())
            .await
            .map_err(GatewayError::Bind)?;
        let local_addr = listener.local_addr().map_err(GatewayError::Bind)?;

        info!(target: "Gateway", "[系统] 服务启动成功 | 监听: {}", local_addr);
        if let Some(token) = &self.shared.config.access_token
            && !token.is_empty()
        {
            info!(target: "Gateway", "[安全] 鉴权模式已启用");
        }
        if let Some(bot_id) = &self.shared.config.bot_id
            && !bot_id.is_empty()
        {
            info!(target: "Gateway", "[配置] 绑定机器人: {}", bot_id);
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(accept_loop(listener, self.shared.clone(), cancel.clone()));

        life.cancel = Some(cancel);
        life.accept_task = Some(task);
        life.local_addr = Some(local_addr);
        Ok(())
    }

    /// 停止监听并强制断开所有连接。重复调用是无害的空操作
    pub async fn stop(&self) {
        let mut life = self.lifecycle.lock().await;
        self.stop_locked(&mut life).await;
    }

    async fn stop_locked(&self, life: &mut Lifecycle) {
        let Some(cancel) = life.cancel.take() else {
            return;
        };
        cancel.cancel();
        if let Some(task) = life.accept_task.take() {
            let _ = task.await;
        }
        for conn in self.shared.registry.drain() {
            conn.close().await;
        }
        life.local_addr = None;
        info!(target: "Gateway", "[系统] 服务已停止");
    }

    /// 停止后带延迟地重新启动，用于端口释放滞后等瞬态故障。
    /// 全部尝试失败后网关保持停止状态，结果经日志通道上报，不向调用方抛出
    pub async fn restart(&self) {
        let mut life = self.lifecycle.lock().await;
        self.stop_locked(&mut life).await;

        for attempt in 1..=RESTART_ATTEMPTS {
            match self.start_locked(&mut life).await {
                Ok(()) => {
                    info!(target: "Gateway", "[系统] 第 {} 次尝试重启成功", attempt);
                    return;
                }
                Err(e) => {
                    warn!(target: "Gateway", "[重启] 第 {}/{} 次尝试失败: {}", attempt, RESTART_ATTEMPTS, e);
                }
            }
            if attempt < RESTART_ATTEMPTS {
                tokio::time::sleep(RESTART_DELAY).await;
            }
        }
        error!(target: "Gateway", "[重启] 重试次数耗尽，服务保持停止，需人工介入");
    }
}

// ================== 接入与握手 ==================

/// 接入循环：每个到来的连接派生独立的握手任务，
/// 慢速客户端不会阻塞新连接的接入
async fn accept_loop(listener: TcpListener, shared: Shared, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let shared = shared.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer, shared, cancel).await;
                    });
                }
                Err(e) => warn!(target: "Gateway", "[监听异常] {}", e),
            }
        }
    }
}

/// 预检请求是否为 WebSocket 升级。
/// peek 不消费数据，真正的握手仍由 tungstenite 完成；
/// 反复窥视直到请求头接收完整或超出等待上限
async fn is_websocket_upgrade(stream: &TcpStream) -> bool {
    let mut buf = [0u8; 2048];
    for _ in 0..50 {
        let n = match tokio::time::timeout(Duration::from_millis(100), stream.peek(&mut buf)).await
        {
            Ok(Ok(n)) if n > 0 => n,
            // 对端在发出请求前断开
            Ok(_) => return false,
            // 尚无数据到达，继续等待
            Err(_) => continue,
        };
        let head = String::from_utf8_lossy(&buf[..n]);
        if head.contains("\r\n\r\n") || n == buf.len() {
            let head = head.to_ascii_lowercase();
            return head.contains("upgrade:") && head.contains("websocket");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// 构造带指定状态码的握手拒绝响应
fn reject(status: StatusCode) -> ErrorResponse {
    let mut response = ErrorResponse::new(None);
    *response.status_mut() = status;
    response
}

/// 校验 Bearer 请求头或 access_token 查询参数
fn credentials_match(req: &Request, token: &str) -> bool {
    let expected = format!("Bearer {}", token);
    if let Some(auth) = req.headers().get("Authorization").and_then(|v| v.to_str().ok())
        && auth == expected
    {
        return true;
    }
    if let Some(query) = req.uri().query() {
        return query
            .split('&')
            .any(|pair| pair.strip_prefix("access_token=") == Some(token));
    }
    false
}

/// 处理一次握手与其后的整个连接生命周期
async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    shared: Shared,
    cancel: CancellationToken,
) {
    if !is_websocket_upgrade(&stream).await {
        warn!(target: "Gateway", "[拒绝连接] {} 非 WebSocket 请求", peer);
        let _ = stream
            .write_all(b"HTTP/1.1 400 Bad Request\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
            .await;
        return;
    }

    let config = shared.config.clone();
    let mut presented_id: Option<String> = None;

    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        // 1. Token 鉴权（请求头或 access_token 查询参数）
        if let Some(token) = &config.access_token
            && !token.is_empty()
            && !credentials_match(req, token)
        {
            warn!(target: "Gateway", "[拒绝连接] {} Token 错误或未提供", peer);
            return Err(reject(StatusCode::UNAUTHORIZED));
        }

        // 2. 读取客户端上报的身份
        let id = req
            .headers()
            .get("X-Self-ID")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        // 3. 校验绑定身份
        if let Some(required) = &config.bot_id
            && !required.is_empty()
            && id.as_deref() != Some(required.as_str())
        {
            warn!(
                target: "Gateway",
                "[拒绝连接] {} 身份不匹配 (期望:{}, 实际:{})",
                peer,
                required,
                id.as_deref().unwrap_or("<无>")
            );
            return Err(reject(StatusCode::FORBIDDEN));
        }

        presented_id = id;
        Ok(resp)
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(target: "Gateway", "[握手终止] {}: {}", peer, e);
            return;
        }
    };

    // 未上报身份时合成随机占位身份，保证连接仍可被跟踪
    let bot_id = presented_id.unwrap_or_else(|| format!("anon-{:08x}", rand::random::<u32>()));

    let (write_half, read_half) = ws_stream.split();
    let conn = Arc::new(Connection::new(Box::new(write_half)));

    // 停机信号已触发时不再接纳，避免清空后的注册表又被写入
    if cancel.is_cancelled() {
        conn.close().await;
        return;
    }

    // 登记连接：同一身份后到者覆盖先到者
    if let Some(old) = shared.registry.insert(bot_id.clone(), conn.clone()) {
        warn!(target: "Gateway", "[连接] 机器人 {} 重复接入，旧连接将被断开", bot_id);
        tokio::spawn(async move { old.close().await });
    }
    info!(target: "Gateway", "[连接] 机器人 {} 已成功接入 ({})", bot_id, peer);

    receive_loop(read_half, &bot_id, &shared, &cancel).await;

    // 清理：无论接收循环如何退出都恰好执行一次
    shared.registry.remove_if_same(&bot_id, &conn);
    conn.close().await;
    info!(target: "Gateway", "[断开] 机器人 {} 连接已关闭", bot_id);
}

// ================== 接收与分发 ==================

/// 核心接收循环：逐条组装完整消息并移交分发任务
async fn receive_loop<S>(
    mut read_half: S,
    bot_id: &str,
    shared: &Shared,
    cancel: &CancellationToken,
) where
    S: futures_util::Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    loop {
        let inbound = tokio::select! {
            _ = cancel.cancelled() => return,
            inbound = framer::next_message(&mut read_half) => inbound,
        };

        match inbound {
            Ok(Inbound::Text(text)) => {
                // 分发交给独立任务执行，慢速处理器不会阻塞本连接的帧组装
                let shared = shared.clone();
                let bot_id = bot_id.to_owned();
                tokio::spawn(async move { dispatch(text, bot_id, shared).await });
            }
            Ok(Inbound::Closed) => return,
            Err(e) => {
                // 读取错误视为断线，统一走清理路径
                warn!(target: "Gateway", "[读取消息异常] Bot:{} - {}", bot_id, e);
                return;
            }
        }
    }
}

/// 解析、分类、过滤一条入站消息，并按注册顺序调用对应处理器
async fn dispatch(text: String, bot_id: String, shared: Shared) {
    let Some(raw) = event::parse(text) else {
        warn!(target: "Gateway", "[JSON解析错误] Bot:{} 消息已丢弃", bot_id);
        return;
    };

    // 无 post_type 且无关联令牌的残包在分类阶段静默丢弃
    let Some(classified) = event::classify(raw) else {
        return;
    };

    let filter = &shared.config.filter;
    match &classified {
        InboundEvent::GroupMessage(ev) => {
            let view = MessageView(ev);
            if !filter.allows_group(view.group_id().unwrap_or(0), view.user_id()) {
                debug!(target: "Gateway", "[过滤] 群 {} 消息未通过策略", view.group_id().unwrap_or(0));
                return;
            }
        }
        InboundEvent::PrivateMessage(ev) => {
            let view = MessageView(ev);
            if !filter.allows_private(view.user_id()) {
                debug!(target: "Gateway", "[过滤] 用户 {} 消息未通过策略", view.user_id());
                return;
            }
        }
        _ => {}
    }

    let kind = classified.kind();
    let ctx = Context {
        bot_id,
        kind,
        event: classified.into_payload(),
        sender: shared.sender.clone(),
        config: shared.config.clone(),
    };

    for handler in shared.handlers.snapshot(kind) {
        if let Err(e) = handler(ctx.clone()).await {
            error!(target: "Gateway", "[事件处理错误] {}", e);
        }
    }
}
