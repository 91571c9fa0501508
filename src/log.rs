use chrono::Local;
use std::sync::{OnceLock, RwLock};

pub enum Level {
    Info,
    Warn,
    Error,
    Debug,
}

/// 日志接收器：每条日志以单行纯文本推送给外部协作方（仪表盘、持久化等）
pub type LogSink = Box<dyn Fn(&str) + Send + Sync>;

static SINKS: OnceLock<RwLock<Vec<LogSink>>> = OnceLock::new();

fn sinks() -> &'static RwLock<Vec<LogSink>> {
    SINKS.get_or_init(|| RwLock::new(Vec::new()))
}

/// 注册一个日志接收器
/// 接收器只读取文本，网关不关心它如何渲染或存储
pub fn add_sink(sink: impl Fn(&str) + Send + Sync + 'static) {
    sinks().write().unwrap().push(Box::new(sink));
}

/// 统一日志输出函数
/// 控制台格式: [Time] [LEVEL] [Target] Message（带 ANSI 颜色）
/// 接收器收到的是同内容的无色单行文本
pub fn print(level: Level, target: &str, args: std::fmt::Arguments) {
    let now = Local::now().format("%H:%M:%S");

    // ANSI 颜色代码
    let gray = "\x1b[90m";
    let reset = "\x1b[0m";
    let cyan = "\x1b[36m";

    // Level 颜色与标签
    let (color, level_str) = match level {
        Level::Info => ("\x1b[32m", "INFO"),  // Green
        Level::Warn => ("\x1b[33m", "WARN"),  // Yellow
        Level::Error => ("\x1b[31m", "ERRO"), // Red
        Level::Debug => ("\x1b[34m", "DEBG"), // Blue
    };

    println!(
        "{}[{}] {}[{}] {} {}{}{} {}",
        gray,
        now,
        color,
        level_str,
        reset,
        cyan,
        format_args!("[{}]", target),
        reset,
        args
    );

    let guard = sinks().read().unwrap();
    if !guard.is_empty() {
        let plain = format!("[{}] [{}] [{}] {}", now, level_str, target, args);
        for sink in guard.iter() {
            sink(&plain);
        }
    }
}

#[macro_export]
macro_rules! info {
    (target: $target:expr, $($arg:tt)+) => (
        $crate::log::print($crate::log::Level::Info, $target, format_args!($($arg)+))
    );
    ($($arg:tt)+) => (
        $crate::log::print($crate::log::Level::Info, "System", format_args!($($arg)+))
    );
}

#[macro_export]
macro_rules! warn {
    (target: $target:expr, $($arg:tt)+) => (
        $crate::log::print($crate::log::Level::Warn, $target, format_args!($($arg)+))
    );
    ($($arg:tt)+) => (
        $crate::log::print($crate::log::Level::Warn, "System", format_args!($($arg)+))
    );
}

#[macro_export]
macro_rules! error {
    (target: $target:expr, $($arg:tt)+) => (
        $crate::log::print($crate::log::Level::Error, $target, format_args!($($arg)+))
    );
    ($($arg:tt)+) => (
        $crate::log::print($crate::log::Level::Error, "System", format_args!($($arg)+))
    );
}

#[macro_export]
macro_rules! debug {
    (target: $target:expr, $($arg:tt)+) => (
        $crate::log::print($crate::log::Level::Debug, $target, format_args!($($arg)+))
    );
    ($($arg:tt)+) => (
        $crate::log::print($crate::log::Level::Debug, "System", format_args!($($arg)+))
    );
}
