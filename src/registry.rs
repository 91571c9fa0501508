use dashmap::DashMap;
use futures_util::{Sink, SinkExt};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

pub type BotId = String;

/// 写半部的统一封装：任何实现 Sink 的对象都可作为出站通道
pub type TraitSink = Box<dyn Sink<WsMessage, Error = WsError> + Send + Unpin>;

/// 一条活跃连接
/// 写半部由互斥锁保护，保证同一 socket 上的写入严格串行
pub struct Connection {
    writer: AsyncMutex<TraitSink>,
}

impl Connection {
    pub fn new(writer: TraitSink) -> Self {
        Self {
            writer: AsyncMutex::new(writer),
        }
    }

    /// 串行发送一条文本帧。锁在任何返回路径上都会释放
    pub async fn send_text(&self, json: String) -> Result<(), WsError> {
        let mut guard = self.writer.lock().await;
        guard.send(WsMessage::Text(json.into())).await
    }

    /// 关闭底层 socket。重复关闭无害
    pub async fn close(&self) {
        let mut guard = self.writer.lock().await;
        let _ = guard.send(WsMessage::Close(None)).await;
        let _ = guard.close().await;
    }
}

/// 机器人身份 → 活跃连接 的线程安全映射
/// "某机器人是否在线"以这里为唯一事实来源
pub struct Registry {
    inner: DashMap<BotId, Arc<Connection>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// 登记连接。同名身份后到者覆盖先到者，返回被顶替的旧连接
    pub fn insert(&self, id: BotId, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        self.inner.insert(id, conn)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.inner.get(id).map(|entry| entry.value().clone())
    }

    /// 仅当登记的仍是这条连接时才移除
    /// 防止被顶替的旧连接在清理时误删后到者的登记
    pub fn remove_if_same(&self, id: &str, conn: &Arc<Connection>) -> bool {
        self.inner
            .remove_if(id, |_, current| Arc::ptr_eq(current, conn))
            .is_some()
    }

    /// 取出全部连接并清空映射（停机时使用）
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        let all: Vec<Arc<Connection>> = self.inner.iter().map(|e| e.value().clone()).collect();
        self.inner.clear();
        all
    }

    /// 当前在线的身份快照
    pub fn ids(&self) -> Vec<BotId> {
        self.inner.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
