//! 日志槽与范围日志门面
//!
//! 日志槽抽象了进程的日志后端，默认实现委托给 `tracing` 宏；
//! 测试或特殊部署可以注入自定义实现。范围日志门面把当前请求的
//! 标识三元组自动加在每条消息前面。

use std::fmt;
use std::sync::Arc;

use crate::event::LogLevel;
use crate::trace_context::TraceContext;

/// 日志槽：接收格式化后日志文本的目的地
pub trait LogSink: Send + Sync {
    fn error(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn debug(&self, message: &str);

    /// 按级别分发一条消息
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => self.error(message),
            LogLevel::Warn => self.warn(message),
            LogLevel::Info => self.info(message),
            LogLevel::Debug => self.debug(message),
        }
    }
}

/// 默认日志槽，委托给 `tracing` 宏
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn error(&self, message: &str) {
        tracing::error!("{message}");
    }

    fn info(&self, message: &str) {
        tracing::info!("{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{message}");
    }

    fn debug(&self, message: &str) {
        tracing::debug!("{message}");
    }
}

/// 范围日志门面
///
/// 绑定一次请求的追踪上下文，每条消息前自动输出
/// `[traceId=..., spanId=..., parentSpanId=...]` 前缀后交给日志槽。
/// 中间件会把它放进请求扩展，处理器内可直接取用。
#[derive(Clone)]
pub struct ScopedLogger {
    ctx: TraceContext,
    sink: Arc<dyn LogSink>,
}

impl ScopedLogger {
    pub fn new(ctx: TraceContext, sink: Arc<dyn LogSink>) -> Self {
        Self { ctx, sink }
    }

    /// 本条日志门面绑定的追踪上下文
    pub fn context(&self) -> &TraceContext {
        &self.ctx
    }

    /// 底层日志槽
    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }

    fn prefixed(&self, message: &str) -> String {
        format!("{}\n{}", self.ctx.identity_prefix(), message)
    }

    pub fn error(&self, message: &str) {
        self.sink.error(&self.prefixed(message));
    }

    pub fn info(&self, message: &str) {
        self.sink.info(&self.prefixed(message));
    }

    pub fn warn(&self, message: &str) {
        self.sink.warn(&self.prefixed(message));
    }

    pub fn debug(&self, message: &str) {
        self.sink.debug(&self.prefixed(message));
    }
}

impl fmt::Debug for ScopedLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedLogger")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// 测试用日志槽，按级别收集消息
    #[derive(Default)]
    struct CaptureSink {
        entries: Mutex<Vec<(LogLevel, String)>>,
    }

    impl LogSink for CaptureSink {
        fn error(&self, message: &str) {
            self.entries
                .lock()
                .unwrap()
                .push((LogLevel::Error, message.to_string()));
        }
        fn info(&self, message: &str) {
            self.entries
                .lock()
                .unwrap()
                .push((LogLevel::Info, message.to_string()));
        }
        fn warn(&self, message: &str) {
            self.entries
                .lock()
                .unwrap()
                .push((LogLevel::Warn, message.to_string()));
        }
        fn debug(&self, message: &str) {
            self.entries
                .lock()
                .unwrap()
                .push((LogLevel::Debug, message.to_string()));
        }
    }

    #[test]
    fn test_scoped_logger_prefixes_identity() {
        let sink = Arc::new(CaptureSink::default());
        let ctx = TraceContext::from_ids("t1", "s1", "p1");
        let logger = ScopedLogger::new(ctx, sink.clone());

        logger.info("hello");
        logger.error("boom");

        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, LogLevel::Info);
        assert_eq!(
            entries[0].1,
            "[traceId=t1, spanId=s1, parentSpanId=p1]\nhello"
        );
        assert_eq!(entries[1].0, LogLevel::Error);
        assert!(entries[1].1.ends_with("\nboom"));
    }

    #[test]
    fn test_sink_log_dispatch() {
        let sink = CaptureSink::default();
        sink.log(LogLevel::Warn, "w");
        sink.log(LogLevel::Debug, "d");

        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries[0], (LogLevel::Warn, "w".to_string()));
        assert_eq!(entries[1], (LogLevel::Debug, "d".to_string()));
    }

    mod tracing_backend {
        use super::*;
        use tracing::field::{Field, Visit};
        use tracing_subscriber::layer::{Context, Layer};
        use tracing_subscriber::prelude::*;

        /// 测试用订阅层，收集每个事件的级别和message字段
        #[derive(Clone, Default)]
        struct RecordingLayer {
            events: Arc<Mutex<Vec<(tracing::Level, String)>>>,
        }

        struct MessageVisitor(String);

        impl Visit for MessageVisitor {
            fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
                if field.name() == "message" {
                    self.0 = format!("{value:?}");
                }
            }
        }

        impl<S: tracing::Subscriber> Layer<S> for RecordingLayer {
            fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
                let mut visitor = MessageVisitor(String::new());
                event.record(&mut visitor);
                self.events
                    .lock()
                    .unwrap()
                    .push((*event.metadata().level(), visitor.0));
            }
        }

        /// 默认日志槽的每个级别都应落到 `tracing` 对应级别的事件上
        #[test]
        fn test_tracing_sink_routes_levels_to_subscriber() {
            let layer = RecordingLayer::default();
            let events = Arc::clone(&layer.events);
            let subscriber = tracing_subscriber::registry().with(layer);

            tracing::subscriber::with_default(subscriber, || {
                let sink = TracingSink;
                sink.info("hello");
                sink.error("boom");
                sink.log(LogLevel::Warn, "careful");
            });

            let events = events.lock().unwrap();
            assert_eq!(events.len(), 3);
            assert_eq!(events[0], (tracing::Level::INFO, "hello".to_string()));
            assert_eq!(events[1], (tracing::Level::ERROR, "boom".to_string()));
            assert_eq!(events[2], (tracing::Level::WARN, "careful".to_string()));
        }
    }
}
