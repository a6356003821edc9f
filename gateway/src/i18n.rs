//! 面向客户端的提示文本
//!
//! 站点默认德语，`Accept-Language` 首选英语时返回英语。

use axum::http::{HeaderMap, header};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
    De,
    En,
}

impl Locale {
    /// 从 `Accept-Language` 头选择语言，只看第一个语言标签
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let first = headers
            .get(header::ACCEPT_LANGUAGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|tag| tag.split(';').next().unwrap_or_default().trim().to_ascii_lowercase());

        match first.as_deref() {
            Some(tag) if tag == "en" || tag.starts_with("en-") => Self::En,
            _ => Self::De,
        }
    }

    pub fn too_many_login_attempts(self, retry_after: u64) -> String {
        match self {
            Self::De => format!(
                "Zu viele fehlgeschlagene Anmeldeversuche. Bitte versuchen Sie es in {} Sekunden erneut.",
                retry_after
            ),
            Self::En => format!(
                "Too many failed login attempts. Please try again in {} seconds.",
                retry_after
            ),
        }
    }

    pub fn invalid_password(self, remaining: u32) -> String {
        match (self, remaining) {
            (Self::De, 0) => "Ungültiges Passwort.".to_string(),
            (Self::De, 1) => "Ungültiges Passwort. Noch 1 Versuch.".to_string(),
            (Self::De, n) => format!("Ungültiges Passwort. Noch {} Versuche.", n),
            (Self::En, 0) => "Invalid password.".to_string(),
            (Self::En, 1) => "Invalid password. 1 attempt remaining.".to_string(),
            (Self::En, n) => format!("Invalid password. {} attempts remaining.", n),
        }
    }

    pub fn too_many_requests(self) -> &'static str {
        match self {
            Self::De => "Zu viele Anfragen. Bitte versuchen Sie es später erneut.",
            Self::En => "Too many requests. Please try again later.",
        }
    }
}
