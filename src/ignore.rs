//! 日志忽略规则
//!
//! 决定某个请求是否排除在日志之外。规则要么是针对请求路径的正则，
//! 要么是针对整个请求画像（path/method/ip/host）的谓词函数。
//! 任意一条规则命中即忽略；空规则列表不忽略任何请求。

use std::fmt;
use std::sync::Arc;

use regex::Regex;

/// 忽略规则判定的输入：一次请求的画像
#[derive(Debug, Clone, Copy)]
pub struct IgnoreSubject<'a> {
    pub path: &'a str,
    pub method: &'a str,
    pub ip: &'a str,
    pub host: &'a str,
}

type Predicate = Arc<dyn Fn(&IgnoreSubject<'_>) -> bool + Send + Sync>;

/// 单条忽略规则
#[derive(Clone)]
pub enum Matcher {
    /// 针对请求路径的正则，命中非空文本时成立。
    /// 非法的正则表达式永远不成立，构造时不报错。
    Pattern(Option<Regex>),
    /// 针对请求画像的谓词函数
    Predicate(Predicate),
}

impl Matcher {
    /// 从字符串构造路径正则规则
    ///
    /// 编译失败的模式得到一条永不成立的规则，而不是错误。
    pub fn pattern(pattern: &str) -> Self {
        Matcher::Pattern(Regex::new(pattern).ok())
    }

    /// 从谓词函数构造规则
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&IgnoreSubject<'_>) -> bool + Send + Sync + 'static,
    {
        Matcher::Predicate(Arc::new(f))
    }

    /// 判定本条规则对给定请求是否成立
    fn matches(&self, subject: &IgnoreSubject<'_>) -> bool {
        match self {
            // 正则命中空文本不算命中
            Matcher::Pattern(Some(re)) => re
                .find(subject.path)
                .map(|m| !m.as_str().is_empty())
                .unwrap_or(false),
            Matcher::Pattern(None) => false,
            Matcher::Predicate(f) => f(subject),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Pattern(Some(re)) => write!(f, "Matcher::Pattern({:?})", re.as_str()),
            Matcher::Pattern(None) => write!(f, "Matcher::Pattern(<invalid>)"),
            Matcher::Predicate(_) => write!(f, "Matcher::Predicate(..)"),
        }
    }
}

impl From<&str> for Matcher {
    fn from(pattern: &str) -> Self {
        Matcher::pattern(pattern)
    }
}

impl From<Regex> for Matcher {
    fn from(re: Regex) -> Self {
        Matcher::Pattern(Some(re))
    }
}

/// 判定请求是否应排除在日志之外
///
/// 任意一条规则命中即返回true（逻辑或，允许短路）；
/// 空规则列表返回false。判定结果不缓存。
pub fn should_ignore(matchers: &[Matcher], subject: &IgnoreSubject<'_>) -> bool {
    matchers.iter().any(|m| m.matches(subject))
}
