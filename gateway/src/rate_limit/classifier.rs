//! 路由分类器
//!
//! 根据请求路径确定流量等级，或判定该路径不受限流保护
//!
//! 分类基于解码后的规范路径：百分号编码被还原，重复的 `/` 被合并。
//! 含有 `.`、`..` 段或反斜杠的路径在上游可能被解析到另一个位置，
//! 这类路径由 [`is_ambiguous_path`] 识别，不参与分类。

use crate::rate_limit::types::Tier;

/// 路由规则的目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    /// 归入某个等级
    Tier(Tier),
    /// 显式排除，不做限流
    Excluded,
}

/// 单条前缀规则
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub prefix: String,
    pub target: RouteTarget,
}

impl RouteRule {
    pub fn new(prefix: impl Into<String>, target: RouteTarget) -> Self {
        Self {
            prefix: prefix.into(),
            target,
        }
    }

    /// 按路径段边界匹配：`/api/export` 匹配 `/api/export` 和 `/api/export/x`，
    /// 不匹配 `/api/exports`
    fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || self.prefix.ends_with('/'),
            None => false,
        }
    }
}

/// 路由分类器
///
/// 规则表在启动时构造，之后只读；最长的匹配前缀生效。
#[derive(Debug, Clone)]
pub struct RouteClassifier {
    rules: Vec<RouteRule>,
}

impl RouteClassifier {
    pub fn new(mut rules: Vec<RouteRule>) -> Self {
        // 长前缀优先，等长时保持声明顺序
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { rules }
    }

    /// 对请求路径进行分类
    ///
    /// 返回 `None` 表示该路径不受限流保护（被排除或不属于 API）。
    pub fn classify(&self, path: &str) -> Option<Tier> {
        let path = canonical_path(path);

        self.rules
            .iter()
            .find(|rule| rule.matches(&path))
            .and_then(|rule| match rule.target {
                RouteTarget::Tier(tier) => Some(tier),
                RouteTarget::Excluded => None,
            })
    }
}

/// 解码后的路径段，忽略查询串和片段
fn decoded_segments(path: &str) -> Vec<String> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let decoded = urlencoding::decode_binary(path.as_bytes());
    String::from_utf8_lossy(&decoded)
        .split('/')
        .map(str::to_string)
        .collect()
}

/// 规范路径：`/` 开头，无空段
fn canonical_path(path: &str) -> String {
    let segments: Vec<String> = decoded_segments(path)
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}

/// 路径是否含有 `.`/`..` 段（包括 `%2e` 形式）或反斜杠
///
/// 上游的 URL 解析会消除点段、把反斜杠当作分隔符，
/// 导致网关看到的路径与上游实际处理的路径不一致。
pub fn is_ambiguous_path(path: &str) -> bool {
    decoded_segments(path)
        .iter()
        .any(|segment| segment == "." || segment == ".." || segment.contains('\\'))
}

impl Default for RouteClassifier {
    /// 默认策略
    ///
    /// 1. `/api/chat`、`/api/admin`、`/api/cron`：不限流
    /// 2. `/api/export`：Export（最严格）
    /// 3. `/api/search`：Search
    /// 4. 其余 `/api`：General
    fn default() -> Self {
        Self::new(vec![
            RouteRule::new("/api/chat", RouteTarget::Excluded),
            RouteRule::new("/api/admin", RouteTarget::Excluded),
            RouteRule::new("/api/cron", RouteTarget::Excluded),
            RouteRule::new("/api/export", RouteTarget::Tier(Tier::Export)),
            RouteRule::new("/api/search", RouteTarget::Tier(Tier::Search)),
            RouteRule::new("/api", RouteTarget::Tier(Tier::General)),
        ])
    }
}
