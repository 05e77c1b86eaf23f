//! 追踪上下文核心结构体定义

use std::fmt;
use std::time::{Duration, Instant};

use crate::id;

/// 追踪上下文
///
/// 持有一次请求（或一次出站调用）的 B3 标识三元组和起始时间标记。
/// 三个标识字段在创建后不可变；起始时间在创建时设置一次，
/// 请求结束后整个上下文随任务作用域一起销毁，不做任何持久化。
#[derive(Debug, Clone)]
pub struct TraceContext {
    trace_id: String,
    span_id: String,
    parent_span_id: String,
    start: Instant,
    start_micros: u64,
}

impl TraceContext {
    /// 建立一个新的根上下文
    ///
    /// traceId 与 spanId 使用同一个新生成的ID，parentSpanId 为空字符串。
    /// 入站头部缺失追踪信息时走这条路径，属于正常情况而非错误。
    pub fn new_root() -> Self {
        let id = id::generate();
        Self {
            trace_id: id.clone(),
            span_id: id,
            parent_span_id: String::new(),
            start: Instant::now(),
            start_micros: id::now_micros(),
        }
    }

    /// 从入站头部携带的三个标识字段建立上下文
    ///
    /// 三个值按原样保留，不做格式校验；parentSpanId 缺失时传入空字符串。
    pub fn from_ids(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        parent_span_id: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_span_id: parent_span_id.into(),
            start: Instant::now(),
            start_micros: id::now_micros(),
        }
    }

    /// 追踪ID
    #[inline]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// 当前跨度ID
    #[inline]
    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    /// 父跨度ID，根跨度为空字符串
    #[inline]
    pub fn parent_span_id(&self) -> &str {
        &self.parent_span_id
    }

    /// 上下文建立时的Unix时间戳（微秒级）
    #[inline]
    pub fn start_micros(&self) -> u64 {
        self.start_micros
    }

    /// 从上下文建立到现在经过的时间
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// 日志前缀形式的标识三元组
    ///
    /// 格式：`[traceId=..., spanId=..., parentSpanId=...]`，
    /// 供范围日志门面在每条消息前输出。
    pub fn identity_prefix(&self) -> String {
        format!(
            "[traceId={}, spanId={}, parentSpanId={}]",
            self.trace_id, self.span_id, self.parent_span_id
        )
    }
}

impl PartialEq for TraceContext {
    /// 相等性只比较标识三元组，起始时间标记不参与
    fn eq(&self, other: &Self) -> bool {
        self.trace_id == other.trace_id
            && self.span_id == other.span_id
            && self.parent_span_id == other.parent_span_id
    }
}

impl Eq for TraceContext {}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{},{},{}]",
            self.trace_id, self.span_id, self.parent_span_id
        )
    }
}
