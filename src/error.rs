//! 错误类型
//!
//! 本层自身没有致命错误：序列化失败降级为字符串、头部缺失走根上下文、
//! 下游处理器错误只观察不吞掉。唯一的具名错误是出站调用的非2xx状态，
//! 由 `TracedResponse::error_for_status` 主动转换而来，供服务端的
//! 错误响应助手还原上游状态码。

use thiserror::Error;

/// 出站调用返回的非2xx状态
///
/// 拦截器本身从不抛出它；只有调用方显式调用 `error_for_status`
/// 时才会产生。message 取自上游响应体的 `message` 字段（如果有）。
#[derive(Debug, Clone, Error)]
#[error("remote call failed with status {status}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
pub struct RemoteError {
    /// 上游返回的HTTP状态码
    pub status: u16,
    /// 上游响应体携带的错误消息
    pub message: Option<String>,
}

impl RemoteError {
    pub fn new(status: u16, message: Option<String>) -> Self {
        Self { status, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_message() {
        let err = RemoteError::new(502, Some("bad gateway".into()));
        assert_eq!(
            err.to_string(),
            "remote call failed with status 502: bad gateway"
        );
    }

    #[test]
    fn test_display_without_message() {
        let err = RemoteError::new(404, None);
        assert_eq!(err.to_string(), "remote call failed with status 404");
    }

    #[test]
    fn test_downcast_from_dyn_error() {
        let err: Box<dyn std::error::Error> = Box::new(RemoteError::new(503, None));
        let remote = err.downcast_ref::<RemoteError>().unwrap();
        assert_eq!(remote.status, 503);
    }
}
