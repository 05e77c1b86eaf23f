//! 追踪上下文的任务级管理
//!
//! 使用 `tokio::task_local` 提供与Web框架无关的追踪上下文管理。
//! 每个入站请求对应一个逻辑任务，任务内的出站调用通过环境查找
//! 获得当前上下文，无需在函数签名中逐层传递。

use crate::trace_context::TraceContext;
use tokio::task_local;

// 使用tokio的task_local来存储当前请求的追踪上下文
task_local! {
    static CURRENT_TRACE_CONTEXT: TraceContext;
}

/// 获取当前追踪上下文
///
/// 从当前异步任务的上下文中读取，任务外调用返回None。
/// 出站拦截器使用这个函数：上下文缺失时不写追踪头部，属于正常情况。
pub fn current_trace_context() -> Option<TraceContext> {
    CURRENT_TRACE_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}

/// 获取当前追踪上下文，缺失时回退为新的根上下文
///
/// 如果当前不在追踪上下文中，则记录一个警告并建立一个新的根上下文。
///
/// # 返回
/// 当前请求的追踪上下文
pub fn get_trace_context() -> TraceContext {
    CURRENT_TRACE_CONTEXT
        .try_with(|ctx| ctx.clone())
        .unwrap_or_else(|_| {
            // 如果不在追踪上下文中，记录警告并建立新的根上下文
            tracing::warn!("TraceContext not found in task-local context. Creating a new root context. This might indicate a logic error where a function is called outside of a traced request scope.");
            TraceContext::new_root()
        })
}

/// 在指定的追踪上下文中执行异步操作
///
/// # 参数
/// * `ctx` - 要设置的追踪上下文
/// * `future` - 要执行的异步操作
///
/// # 返回
/// 异步操作的结果
pub async fn with_trace_context<F, T>(ctx: TraceContext, future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    CURRENT_TRACE_CONTEXT.scope(ctx, future).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// 验证在没有上下文时，current_trace_context 返回 None，
    /// get_trace_context 能回退到建立一个新的根上下文
    #[tokio::test]
    async fn test_outside_context_behavior() {
        assert!(current_trace_context().is_none(), "任务外不应有上下文");

        let ctx1 = get_trace_context();
        assert_eq!(ctx1.trace_id(), ctx1.span_id(), "回退上下文应为根上下文");
        assert!(ctx1.parent_span_id().is_empty());

        // 再次调用，应该建立一个不同的新上下文
        let ctx2 = get_trace_context();
        assert_ne!(ctx1, ctx2, "连续调用应建立不同的上下文");
    }

    /// 验证with_trace_context在整个异步作用域内（包括await点之后）都保持上下文
    #[tokio::test]
    async fn test_context_persistence_across_await() {
        let expected = TraceContext::from_ids("t-persist", "s-persist", "");

        let result = with_trace_context(expected.clone(), async {
            // 在await之前检查
            assert_eq!(current_trace_context().unwrap(), expected);

            // 模拟异步操作
            tokio::time::sleep(Duration::from_millis(1)).await;

            // 在await之后再次检查
            assert_eq!(current_trace_context().unwrap(), expected);

            "test_result"
        })
        .await;

        assert_eq!(result, "test_result");

        // 验证在作用域之外，上下文已消失
        assert!(
            current_trace_context().is_none(),
            "上下文不应泄漏到作用域之外"
        );
    }

    /// 验证嵌套上下文的正确覆盖和恢复
    #[tokio::test]
    async fn test_nested_context() {
        let outer = TraceContext::from_ids("t-outer", "s-outer", "");
        let inner = TraceContext::from_ids("t-inner", "s-inner", "s-outer");

        with_trace_context(outer.clone(), async {
            assert_eq!(current_trace_context().unwrap(), outer, "应处于外层上下文");

            with_trace_context(inner.clone(), async {
                assert_eq!(current_trace_context().unwrap(), inner, "应处于内层上下文");
            })
            .await;

            // 验证退出内层后，恢复到外层上下文
            assert_eq!(current_trace_context().unwrap(), outer, "应恢复到外层上下文");
        })
        .await;
    }

    /// 验证并发任务之间的上下文隔离
    #[tokio::test]
    async fn test_concurrent_context_isolation() {
        let mut handles = vec![];
        const NUM_TASKS: usize = 50;

        for _ in 0..NUM_TASKS {
            let ctx = TraceContext::new_root();
            let ctx_clone = ctx.clone();

            let handle = tokio::spawn(async move {
                with_trace_context(ctx_clone, async move {
                    // 随机等待一段时间，增加任务交错执行的可能性
                    tokio::time::sleep(Duration::from_millis(fastrand::u64(1..10))).await;

                    // 验证当前任务的上下文是否正确
                    assert_eq!(
                        current_trace_context().unwrap(),
                        ctx,
                        "并发任务中的上下文应保持隔离和正确"
                    );
                })
                .await;
            });
            handles.push(handle);
        }

        // 等待所有并发任务完成
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
