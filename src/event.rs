use simd_json::OwnedValue;
use simd_json::derived::{ValueObjectAccess, ValueObjectAccessAsScalar};

pub type Event = OwnedValue;

/// 事件类别（注册处理器时使用的键）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    GroupMessage,
    PrivateMessage,
    Notice,
    Request,
    MetaEvent,
    ApiResponse,
    Unrecognized,
}

/// 分类后的入站事件。负载原样携带，核心不做任何修改
#[derive(Debug, Clone)]
pub enum InboundEvent {
    GroupMessage(Event),
    PrivateMessage(Event),
    Notice(Event),
    Request(Event),
    MetaEvent(Event),
    ApiResponse(Event),
    Unrecognized(Event),
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::GroupMessage(_) => EventKind::GroupMessage,
            InboundEvent::PrivateMessage(_) => EventKind::PrivateMessage,
            InboundEvent::Notice(_) => EventKind::Notice,
            InboundEvent::Request(_) => EventKind::Request,
            InboundEvent::MetaEvent(_) => EventKind::MetaEvent,
            InboundEvent::ApiResponse(_) => EventKind::ApiResponse,
            InboundEvent::Unrecognized(_) => EventKind::Unrecognized,
        }
    }

    pub fn payload(&self) -> &Event {
        match self {
            InboundEvent::GroupMessage(event)
            | InboundEvent::PrivateMessage(event)
            | InboundEvent::Notice(event)
            | InboundEvent::Request(event)
            | InboundEvent::MetaEvent(event)
            | InboundEvent::ApiResponse(event)
            | InboundEvent::Unrecognized(event) => event,
        }
    }

    pub fn into_payload(self) -> Event {
        match self {
            InboundEvent::GroupMessage(event)
            | InboundEvent::PrivateMessage(event)
            | InboundEvent::Notice(event)
            | InboundEvent::Request(event)
            | InboundEvent::MetaEvent(event)
            | InboundEvent::ApiResponse(event)
            | InboundEvent::Unrecognized(event) => event,
        }
    }
}

/// 解析一条完整 JSON 文本。失败返回 None，由调用方记录日志后丢弃
pub fn parse(text: String) -> Option<Event> {
    let mut bytes = text.into_bytes();
    simd_json::to_owned_value(&mut bytes).ok()
}

/// 对事件进行分类。返回 None 表示静默丢弃（心跳残包、无法关联的响应等）
pub fn classify(event: Event) -> Option<InboundEvent> {
    let post_type = event.get_str("post_type").map(str::to_owned);
    let Some(post_type) = post_type else {
        // 无 post_type：携带关联令牌的是 API 响应，其余直接丢弃
        if event.get("echo").is_some() {
            return Some(InboundEvent::ApiResponse(event));
        }
        return None;
    };

    let classified = match post_type.as_str() {
        "meta_event" => InboundEvent::MetaEvent(event),
        "message" => {
            let message_type = event.get_str("message_type").map(str::to_owned);
            match message_type.as_deref() {
                Some("group") => InboundEvent::GroupMessage(event),
                Some("private") => InboundEvent::PrivateMessage(event),
                _ => InboundEvent::Unrecognized(event),
            }
        }
        "notice" => InboundEvent::Notice(event),
        "request" => InboundEvent::Request(event),
        // 未知的上报类型走兜底通道，避免前向兼容事件被丢失
        _ => InboundEvent::Unrecognized(event),
    };
    Some(classified)
}

// ================== 事件视图 ==================

/// 消息事件视图，提供便捷的字段访问
pub struct MessageView<'a>(pub &'a Event);

impl<'a> MessageView<'a> {
    /// 获取群号 (如果是群消息)
    pub fn group_id(&self) -> Option<i64> {
        self.0
            .get_i64("group_id")
            .or_else(|| self.0.get_u64("group_id").map(|v| v as i64))
    }

    /// 获取发送者 ID
    pub fn user_id(&self) -> i64 {
        self.0
            .get_i64("user_id")
            .or_else(|| self.0.get_u64("user_id").map(|v| v as i64))
            .unwrap_or(0)
    }

    /// 获取纯文本内容 (raw_message)
    pub fn text(&self) -> &'a str {
        self.0.get_str("raw_message").unwrap_or("")
    }

    /// 获取发送者昵称
    pub fn sender_nickname(&self) -> Option<&'a str> {
        self.0.get("sender").and_then(|s| s.get_str("nickname"))
    }

    /// 获取发送者群名片 (为空则返回 None)
    pub fn sender_card(&self) -> Option<&'a str> {
        self.0
            .get("sender")
            .and_then(|s| s.get_str("card"))
            .filter(|s| !s.is_empty())
    }

    /// 获取发送者显示名称 (优先名片，其次昵称)
    pub fn sender_name(&self) -> &'a str {
        self.sender_card()
            .or_else(|| self.sender_nickname())
            .unwrap_or("Unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(text: &str) -> Event {
        parse(text.to_string()).expect("valid json")
    }

    #[test]
    fn missing_post_type_without_echo_is_dropped() {
        assert!(classify(event(r#"{"status":"ok","retcode":0}"#)).is_none());
    }

    #[test]
    fn missing_post_type_with_echo_is_api_response() {
        let classified = classify(event(r#"{"status":"ok","retcode":0,"echo":"act-1-ff"}"#));
        assert_eq!(classified.unwrap().kind(), EventKind::ApiResponse);
    }

    #[test]
    fn message_branches_on_message_type() {
        let classified = classify(event(
            r#"{"post_type":"message","message_type":"group","group_id":111,"user_id":7}"#,
        ));
        assert_eq!(classified.unwrap().kind(), EventKind::GroupMessage);

        let classified = classify(event(
            r#"{"post_type":"message","message_type":"private","user_id":7}"#,
        ));
        assert_eq!(classified.unwrap().kind(), EventKind::PrivateMessage);

        // 未知 message_type 走兜底通道
        let classified = classify(event(
            r#"{"post_type":"message","message_type":"guild","user_id":7}"#,
        ));
        assert_eq!(classified.unwrap().kind(), EventKind::Unrecognized);
    }

    #[test]
    fn notice_request_and_meta_route_directly() {
        let classified = classify(event(r#"{"post_type":"notice","notice_type":"group_increase"}"#));
        assert_eq!(classified.unwrap().kind(), EventKind::Notice);

        let classified = classify(event(r#"{"post_type":"request","request_type":"friend"}"#));
        assert_eq!(classified.unwrap().kind(), EventKind::Request);

        let classified = classify(event(r#"{"post_type":"meta_event","meta_event_type":"heartbeat"}"#));
        assert_eq!(classified.unwrap().kind(), EventKind::MetaEvent);
    }

    #[test]
    fn unknown_post_type_is_kept_as_unrecognized() {
        let classified = classify(event(r#"{"post_type":"message_sent","user_id":7}"#)).unwrap();
        assert_eq!(classified.kind(), EventKind::Unrecognized);
        // 负载原样保留
        assert_eq!(MessageView(classified.payload()).user_id(), 7);
    }

    #[test]
    fn malformed_json_fails_parse() {
        assert!(parse("{not json".to_string()).is_none());
    }

    #[test]
    fn message_view_reads_sender_fields() {
        let ev = event(
            r#"{"post_type":"message","message_type":"group","group_id":111,"user_id":7,
                "raw_message":"你好","sender":{"nickname":"小白","card":""}}"#,
        );
        let view = MessageView(&ev);
        assert_eq!(view.group_id(), Some(111));
        assert_eq!(view.user_id(), 7);
        assert_eq!(view.text(), "你好");
        // card 为空时回退到昵称
        assert_eq!(view.sender_name(), "小白");
    }
}
