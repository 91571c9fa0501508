//! 网关端到端测试：真实回环 socket + tokio-tungstenite 客户端

use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use mashiro::config::{AppConfig, FilterPolicy};
use mashiro::{Context, EventHandler, EventKind, Gateway, MessageView};
use simd_json::derived::{ValueObjectAccess, ValueObjectAccessAsScalar};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_config() -> AppConfig {
    AppConfig {
        listen: "127.0.0.1:0".to_string(),
        ..AppConfig::default()
    }
}

async fn start_gateway(config: AppConfig) -> (Arc<Gateway>, String) {
    let gateway = Arc::new(Gateway::new(config));
    gateway.start().await.expect("gateway should start");
    let addr = gateway.local_addr().await.expect("bound address");
    (gateway, format!("ws://{}/", addr))
}

async fn connect(url: &str, bot_id: Option<&str>, token: Option<&str>) -> Result<WsClient, WsError> {
    let mut request = url.into_client_request()?;
    if let Some(id) = bot_id {
        request
            .headers_mut()
            .insert("X-Self-ID", HeaderValue::from_str(id).unwrap());
    }
    if let Some(token) = token {
        let value = format!("Bearer {}", token);
        request
            .headers_mut()
            .insert("Authorization", HeaderValue::from_str(&value).unwrap());
    }
    connect_async(request).await.map(|(ws, _)| ws)
}

/// 轮询等待某机器人完成接入（握手完成与登记之间存在极短窗口）
async fn wait_online(gateway: &Gateway, bot_id: &str) {
    for _ in 0..100 {
        if gateway.online_bots().iter().any(|id| id == bot_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("bot {} never came online", bot_id);
}

fn parse(json: &str) -> simd_json::OwnedValue {
    let mut bytes = json.as_bytes().to_vec();
    simd_json::to_owned_value(&mut bytes).unwrap()
}

// ================== 握手与鉴权 ==================

#[tokio::test]
async fn missing_token_is_rejected_with_401() {
    let mut config = test_config();
    config.access_token = Some("sesame".to_string());
    let (gateway, url) = start_gateway(config).await;

    let err = connect(&url, Some("10001"), None)
        .await
        .err()
        .expect("handshake should fail");
    match err {
        WsError::Http(response) => assert_eq!(response.status(), 401),
        other => panic!("expected HTTP 401, got {:?}", other),
    }

    let err = connect(&url, Some("10001"), Some("wrong"))
        .await
        .err()
        .expect("bad token should fail");
    match err {
        WsError::Http(response) => assert_eq!(response.status(), 401),
        other => panic!("expected HTTP 401, got {:?}", other),
    }

    gateway.stop().await;
}

#[tokio::test]
async fn token_is_accepted_via_header_or_query() {
    let mut config = test_config();
    config.access_token = Some("sesame".to_string());
    let (gateway, url) = start_gateway(config).await;

    let ws = connect(&url, Some("10001"), Some("sesame"))
        .await
        .expect("header token should pass");
    drop(ws);

    let query_url = format!("{}?access_token=sesame", url);
    let ws = connect(&query_url, Some("10002"), None)
        .await
        .expect("query token should pass");
    drop(ws);

    gateway.stop().await;
}

#[tokio::test]
async fn identity_mismatch_is_rejected_with_403() {
    let mut config = test_config();
    config.bot_id = Some("10001".to_string());
    let (gateway, url) = start_gateway(config).await;

    let err = connect(&url, Some("20002"), None)
        .await
        .err()
        .expect("mismatched identity should fail");
    match err {
        WsError::Http(response) => assert_eq!(response.status(), 403),
        other => panic!("expected HTTP 403, got {:?}", other),
    }

    let ws = connect(&url, Some("10001"), None)
        .await
        .expect("pinned identity should pass");
    drop(ws);

    gateway.stop().await;
}

#[tokio::test]
async fn plain_http_request_is_answered_with_400() {
    let (gateway, _url) = start_gateway(test_config()).await;
    let addr = gateway.local_addr().await.unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /status HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut buf = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut buf)).await;
    let response = String::from_utf8_lossy(&buf);
    assert!(
        response.starts_with("HTTP/1.1 400"),
        "expected 400 response, got: {}",
        response
    );

    gateway.stop().await;
}

#[tokio::test]
async fn missing_identity_gets_placeholder() {
    let (gateway, url) = start_gateway(test_config()).await;

    let _ws = connect(&url, None, None).await.expect("connect");
    for _ in 0..100 {
        if gateway.online_bots().len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let online = gateway.online_bots();
    assert_eq!(online.len(), 1);
    assert!(
        online[0].starts_with("anon-"),
        "placeholder identity expected, got {}",
        online[0]
    );

    gateway.stop().await;
}

// ================== 分类与分发 ==================

#[tokio::test]
async fn events_reach_the_matching_handler_category() {
    let (gateway, url) = start_gateway(test_config()).await;
    let (tx, mut rx) = mpsc::unbounded_channel::<(EventKind, String)>();

    for kind in [
        EventKind::GroupMessage,
        EventKind::PrivateMessage,
        EventKind::Notice,
        EventKind::Request,
        EventKind::MetaEvent,
        EventKind::ApiResponse,
        EventKind::Unrecognized,
    ] {
        let tx = tx.clone();
        let handler: EventHandler = Arc::new(move |ctx: Context| {
            let tx = tx.clone();
            Box::pin(async move {
                tx.send((ctx.kind, ctx.bot_id.clone())).ok();
                Ok(())
            })
        });
        gateway.register(kind, handler);
    }

    let mut ws = connect(&url, Some("10001"), None).await.expect("connect");

    // 无 post_type 也无关联令牌：应当被静默丢弃
    ws.send(WsMessage::Text(r#"{"status":"ok","retcode":0}"#.into()))
        .await
        .unwrap();

    let payloads = [
        r#"{"post_type":"message","message_type":"group","group_id":111,"user_id":7,"raw_message":"hi"}"#,
        r#"{"post_type":"message","message_type":"private","user_id":7,"raw_message":"hi"}"#,
        r#"{"post_type":"notice","notice_type":"group_increase","group_id":111,"user_id":7}"#,
        r#"{"post_type":"request","request_type":"friend","user_id":7}"#,
        r#"{"post_type":"meta_event","meta_event_type":"heartbeat"}"#,
        r#"{"status":"ok","retcode":0,"echo":"act-9-deadbeef"}"#,
        r#"{"post_type":"message_sent","user_id":7}"#,
    ];
    for payload in payloads {
        ws.send(WsMessage::Text(payload.into())).await.unwrap();
    }

    // 分发经由工作任务执行，消息间的到达顺序不保证，按集合收取
    let mut seen = Vec::new();
    for _ in 0..payloads.len() {
        let (kind, bot_id) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("handler should fire")
            .unwrap();
        assert_eq!(bot_id, "10001");
        seen.push(kind);
    }
    for kind in [
        EventKind::GroupMessage,
        EventKind::PrivateMessage,
        EventKind::Notice,
        EventKind::Request,
        EventKind::MetaEvent,
        EventKind::ApiResponse,
        EventKind::Unrecognized,
    ] {
        assert_eq!(
            seen.iter().filter(|k| **k == kind).count(),
            1,
            "exactly one event for {:?}",
            kind
        );
    }

    // 被丢弃的残包不会触发任何处理器
    assert!(
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .is_err(),
        "dropped message must not reach handlers"
    );

    gateway.stop().await;
}

#[tokio::test]
async fn group_filter_drops_messages_outside_allow_list() {
    let mut config = test_config();
    config.filter = FilterPolicy {
        respond_all_groups: false,
        group_allow: vec![111],
        ..FilterPolicy::default()
    };
    let (gateway, url) = start_gateway(config).await;

    let (tx, mut rx) = mpsc::unbounded_channel::<i64>();
    let handler: EventHandler = Arc::new(move |ctx: Context| {
        let tx = tx.clone();
        Box::pin(async move {
            tx.send(MessageView(&ctx.event).group_id().unwrap_or(0)).ok();
            Ok(())
        })
    });
    gateway.on_group_message(handler);

    let mut ws = connect(&url, Some("10001"), None).await.expect("connect");
    ws.send(WsMessage::Text(
        r#"{"post_type":"message","message_type":"group","group_id":222,"user_id":7,"raw_message":"no"}"#.into(),
    ))
    .await
    .unwrap();
    ws.send(WsMessage::Text(
        r#"{"post_type":"message","message_type":"group","group_id":111,"user_id":7,"raw_message":"yes"}"#.into(),
    ))
    .await
    .unwrap();

    // 只有白名单内的群消息到达处理器
    let group_id = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("allowed message should arrive")
        .unwrap();
    assert_eq!(group_id, 111);
    assert!(
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .is_err(),
        "filtered message must not reach handlers"
    );

    gateway.stop().await;
}

// ================== 动作发送 ==================

#[tokio::test]
async fn actions_are_delivered_with_correlation_token() {
    let (gateway, url) = start_gateway(test_config()).await;
    let mut ws = connect(&url, Some("10001"), None).await.expect("connect");
    wait_online(&gateway, "10001").await;

    let token = gateway.sender().send_group_msg("10001", 42, "你好").await;
    assert!(!token.is_empty(), "send should yield a correlation token");

    let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("client should receive the action")
        .unwrap()
        .unwrap();
    let value = parse(frame.to_text().unwrap());
    assert_eq!(value.get_str("action"), Some("send_group_msg"));
    assert_eq!(value.get_str("echo"), Some(token.as_str()));
    let params = value.get("params").unwrap();
    assert_eq!(params.get_i64("group_id"), Some(42));
    assert_eq!(params.get_str("message"), Some("你好"));

    gateway.stop().await;
}

#[tokio::test]
async fn send_to_offline_bot_returns_empty_token() {
    let (gateway, _url) = start_gateway(test_config()).await;
    let token = gateway.sender().send_private_msg("nobody", 7, "hi").await;
    assert!(token.is_empty());
    gateway.stop().await;
}

// ================== 生命周期 ==================

#[tokio::test]
async fn stop_clears_registry_and_later_sends_fail() {
    let (gateway, url) = start_gateway(test_config()).await;
    let mut ws = connect(&url, Some("10001"), None).await.expect("connect");
    wait_online(&gateway, "10001").await;

    gateway.stop().await;
    assert!(gateway.online_bots().is_empty());
    assert!(!gateway.is_running().await);

    let token = gateway.sender().send_group_msg("10001", 42, "late").await;
    assert!(token.is_empty());

    // 客户端侧随之收到关闭或断流
    let outcome = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    })
    .await;
    assert!(outcome.is_ok(), "client connection should be torn down");

    // 重复 stop 是无害的空操作
    gateway.stop().await;
}

#[tokio::test]
async fn restart_without_prior_start_exhausts_retries_and_stays_stopped() {
    // 先占住端口，让每一次绑定尝试都失败
    let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = blocker.local_addr().unwrap();

    let mut config = test_config();
    config.listen = addr.to_string();
    let gateway = Gateway::new(config);

    // 有限重试必须在可预期的时间内结束
    tokio::time::timeout(Duration::from_secs(10), gateway.restart())
        .await
        .expect("restart must terminate after bounded retries");
    assert!(!gateway.is_running().await);
    drop(blocker);
}

#[tokio::test]
async fn restart_brings_a_running_gateway_back() {
    let (gateway, _url) = start_gateway(test_config()).await;
    assert!(gateway.is_running().await);

    gateway.restart().await;
    assert!(gateway.is_running().await);
    assert!(gateway.local_addr().await.is_some());

    gateway.stop().await;
}

#[tokio::test]
async fn duplicate_identity_displaces_previous_connection() {
    let (gateway, url) = start_gateway(test_config()).await;

    let mut first = connect(&url, Some("10001"), None).await.expect("first");
    wait_online(&gateway, "10001").await;
    let _second = connect(&url, Some("10001"), None).await.expect("second");

    // 旧连接被顶替后收到关闭；登记表里身份仍然唯一
    let outcome = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match first.next().await {
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    })
    .await;
    assert!(outcome.is_ok(), "displaced connection should be closed");
    assert_eq!(gateway.online_bots(), vec!["10001".to_string()]);

    gateway.stop().await;
}
