use crate::registry::Registry;
use crate::{error, warn};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static ECHO_COUNTER: AtomicU64 = AtomicU64::new(1);

/// 生成本次调用的关联令牌：进程内递增序号 + 随机后缀
fn next_echo() -> String {
    let seq = ECHO_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("act-{}-{:08x}", seq, rand::random::<u32>())
}

/// 动作请求的统一信封
#[derive(Serialize)]
struct ActionRequest<P> {
    action: String,
    params: P,
    echo: String,
}

/// 动作发送器：把出站动作序列化后写入指定机器人的 socket
/// 可自由克隆，克隆体共享同一连接注册表
#[derive(Clone)]
pub struct ActionSender {
    registry: Arc<Registry>,
}

impl ActionSender {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// [底层方法] 发送 API 请求，返回关联令牌
    ///
    /// 目标不在线或写入失败时记录日志并返回空串，调用方据此判断发送失败。
    /// 本方法不等待响应、不阻塞等待连接出现，也不会自动重试
    pub async fn send<P: Serialize>(&self, bot_id: &str, action: &str, params: P) -> String {
        let Some(conn) = self.registry.get(bot_id) else {
            warn!(target: "Sender", "[发送失败] 机器人 {} 未连接或已断开", bot_id);
            return String::new();
        };

        let echo = next_echo();
        let request = ActionRequest {
            action: action.to_string(),
            params,
            echo: echo.clone(),
        };

        let json = match simd_json::to_string(&request) {
            Ok(json) => json,
            Err(e) => {
                error!(target: "Sender", "[发送异常] 机器人 {} 参数序列化失败: {}", bot_id, e);
                return String::new();
            }
        };

        match conn.send_text(json).await {
            Ok(()) => echo,
            Err(e) => {
                error!(target: "Sender", "[发送异常] 机器人 {} 发送失败: {}", bot_id, e);
                String::new()
            }
        }
    }

    // ================== 快捷方法 ==================

    /// 发送群消息
    pub async fn send_group_msg(&self, bot_id: &str, group_id: i64, message: &str) -> String {
        let params = SendGroupMsgParams {
            group_id,
            message,
            auto_escape: false,
        };
        self.send(bot_id, "send_group_msg", params).await
    }

    /// 发送私聊消息
    pub async fn send_private_msg(&self, bot_id: &str, user_id: i64, message: &str) -> String {
        let params = SendPrivateMsgParams {
            user_id,
            message,
            auto_escape: false,
        };
        self.send(bot_id, "send_private_msg", params).await
    }

    /// 撤回消息
    pub async fn delete_msg(&self, bot_id: &str, message_id: i64) -> String {
        self.send(bot_id, "delete_msg", DeleteMsgParams { message_id })
            .await
    }

    /// 发送群图片
    pub async fn send_group_image(&self, bot_id: &str, group_id: i64, file: &str) -> String {
        let message = format!("[CQ:image,file={}]", file);
        self.send_group_msg(bot_id, group_id, &message).await
    }

    /// 发送私聊图片
    pub async fn send_private_image(&self, bot_id: &str, user_id: i64, file: &str) -> String {
        let message = format!("[CQ:image,file={}]", file);
        self.send_private_msg(bot_id, user_id, &message).await
    }

    /// 按媒体类型发送群消息（语音、视频等）
    pub async fn send_group_media(
        &self,
        bot_id: &str,
        group_id: i64,
        kind: MediaKind,
        file: &str,
    ) -> String {
        let message = format!("[CQ:{},file={}]", kind.cq_name(), file);
        self.send_group_msg(bot_id, group_id, &message).await
    }

    /// 按媒体类型发送私聊消息
    pub async fn send_private_media(
        &self,
        bot_id: &str,
        user_id: i64,
        kind: MediaKind,
        file: &str,
    ) -> String {
        let message = format!("[CQ:{},file={}]", kind.cq_name(), file);
        self.send_private_msg(bot_id, user_id, &message).await
    }

    /// 禁言群成员（duration 为秒，0 表示解除）
    pub async fn set_group_ban(
        &self,
        bot_id: &str,
        group_id: i64,
        user_id: i64,
        duration: i64,
    ) -> String {
        let params = SetGroupBanParams {
            group_id,
            user_id,
            duration,
        };
        self.send(bot_id, "set_group_ban", params).await
    }

    /// 移出群成员
    pub async fn set_group_kick(
        &self,
        bot_id: &str,
        group_id: i64,
        user_id: i64,
        reject_add_request: bool,
    ) -> String {
        let params = SetGroupKickParams {
            group_id,
            user_id,
            reject_add_request,
        };
        self.send(bot_id, "set_group_kick", params).await
    }

    /// 查询登录号信息
    pub async fn get_login_info(&self, bot_id: &str) -> String {
        self.send(bot_id, "get_login_info", EmptyParams {}).await
    }

    /// 查询群列表
    pub async fn get_group_list(&self, bot_id: &str) -> String {
        self.send(bot_id, "get_group_list", GetGroupListParams { no_cache: false })
            .await
    }

    /// 查询群成员信息
    pub async fn get_group_member_info(
        &self,
        bot_id: &str,
        group_id: i64,
        user_id: i64,
        no_cache: bool,
    ) -> String {
        let params = GetGroupMemberInfoParams {
            group_id,
            user_id,
            no_cache,
        };
        self.send(bot_id, "get_group_member_info", params).await
    }
}

/// CQ 码媒体类型
#[derive(Debug, Clone, Copy)]
pub enum MediaKind {
    Image,
    Record,
    Video,
}

impl MediaKind {
    fn cq_name(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Record => "record",
            MediaKind::Video => "video",
        }
    }
}

// ================== 参数结构 ==================

#[derive(Serialize)]
struct SendGroupMsgParams<'a> {
    group_id: i64,
    message: &'a str,
    auto_escape: bool,
}

#[derive(Serialize)]
struct SendPrivateMsgParams<'a> {
    user_id: i64,
    message: &'a str,
    auto_escape: bool,
}

#[derive(Serialize)]
struct DeleteMsgParams {
    message_id: i64,
}

#[derive(Serialize)]
struct SetGroupBanParams {
    group_id: i64,
    user_id: i64,
    duration: i64,
}

#[derive(Serialize)]
struct SetGroupKickParams {
    group_id: i64,
    user_id: i64,
    reject_add_request: bool,
}

#[derive(Serialize)]
struct GetGroupListParams {
    no_cache: bool,
}

#[derive(Serialize)]
struct GetGroupMemberInfoParams {
    group_id: i64,
    user_id: i64,
    no_cache: bool,
}

#[derive(Serialize)]
struct EmptyParams {}
