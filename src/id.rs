//! 追踪ID生成器
//!
//! 使用时间戳 + 原子计数器 + 机器ID + 随机数的组合生成128位ID，
//! 输出为32字符的小写十六进制字符串。入站头部携带的ID按原样使用，
//! 不做格式校验，生成逻辑只服务于根上下文的创建。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// 机器ID，基于进程ID和启动时间戳生成，确保不同进程/实例的ID不冲突
static MACHINE_ID: LazyLock<u16> = LazyLock::new(|| {
    let pid = std::process::id();
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32;
    ((pid ^ timestamp) & 0xFFFF) as u16
});

/// 生成新的追踪ID
///
/// 构造128位ID：timestamp(48位) + machine_id(16位) + counter(32位) + random(32位)
///
/// # 返回
/// 32字符的小写十六进制字符串
#[inline]
pub(crate) fn generate() -> String {
    // 获取当前时间戳（毫秒级）
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    let machine_id = *MACHINE_ID;
    let random_part = fastrand::u32(..);

    let high_64 = ((timestamp & 0xFFFFFFFFFFFF) << 16) | (machine_id as u64);
    let low_64 = (counter & 0xFFFFFFFF) << 32 | (random_part as u64);

    format!("{high_64:016x}{low_64:016x}")
}

/// 当前的Unix时间戳（微秒级），用于上下文的起始时间标记
#[inline]
pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
