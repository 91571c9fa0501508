use futures_util::future::BoxFuture;
use mashiro::config::AppConfig;
use mashiro::{Context, Gateway, HandlerError, MessageView, info};
use std::sync::Arc;

/// 群消息落到控制台日志
fn log_group_message(ctx: Context) -> BoxFuture<'static, Result<(), HandlerError>> {
    Box::pin(async move {
        let view = MessageView(&ctx.event);
        info!(
            target: "Message",
            "[群 {}] {}: {}",
            view.group_id().unwrap_or(0),
            view.sender_name(),
            view.text()
        );
        Ok(())
    })
}

/// 私聊消息落到控制台日志
fn log_private_message(ctx: Context) -> BoxFuture<'static, Result<(), HandlerError>> {
    Box::pin(async move {
        let view = MessageView(&ctx.event);
        info!(target: "Message", "[私聊] {}: {}", view.sender_name(), view.text());
        Ok(())
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("config.toml").await?;
    let gateway = Arc::new(Gateway::new(config));

    gateway.on_group_message(Arc::new(log_group_message));
    gateway.on_private_message(Arc::new(log_private_message));

    gateway.start().await?;

    tokio::signal::ctrl_c().await?;
    gateway.stop().await;
    Ok(())
}
