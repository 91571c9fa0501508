use futures_util::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Control, Data, OpCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

/// 一次完整读取的结果
#[derive(Debug)]
pub enum Inbound {
    /// 一条完整的文本消息
    Text(String),
    /// 对端关闭了连接
    Closed,
}

/// 从帧流中读取一条完整的文本消息
///
/// tungstenite 通常直接交付完整的 Text 消息；当对端以分片帧发送超大
/// 负载时，逐帧累积到结束帧为止再拼接，消息总大小不设上限。
/// 读取错误向上传播，由接收循环按断线处理。
pub async fn next_message<S>(stream: &mut S) -> Result<Inbound, WsError>
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(message) = stream.next().await {
        match message? {
            WsMessage::Text(text) => return Ok(Inbound::Text(text.as_str().to_owned())),
            WsMessage::Frame(frame) => {
                let header = frame.header();
                match header.opcode {
                    OpCode::Data(Data::Text) | OpCode::Data(Data::Continue) => {
                        let is_final = header.is_final;
                        buffer.extend_from_slice(frame.payload());
                        if is_final {
                            let text = String::from_utf8_lossy(&buffer).into_owned();
                            return Ok(Inbound::Text(text));
                        }
                    }
                    OpCode::Control(Control::Close) => return Ok(Inbound::Closed),
                    _ => {}
                }
            }
            WsMessage::Close(_) => return Ok(Inbound::Closed),
            // 二进制帧与心跳帧不参与消息组装
            WsMessage::Binary(_) | WsMessage::Ping(_) | WsMessage::Pong(_) => {}
        }
    }

    // 流结束等同于连接关闭
    Ok(Inbound::Closed)
}
