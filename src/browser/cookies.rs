//! 认证 cookie 的加载与转换
//!
//! cookie 是只读共享数据：引导阶段从 cookies.json 读入一次，
//! 之后在每个新会话创建时整体注入。

use std::path::Path;

use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::error::{AppError, AppResult};

/// cookies.json 中的一条 cookie
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(default, rename = "httpOnly", skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
}

impl AuthCookie {
    /// 转换为 CDP 注入参数
    pub fn to_cookie_param(&self, fallback_url: &str) -> AppResult<CookieParam> {
        let mut value = json!({
            "name": self.name,
            "value": self.value,
        });
        match &self.domain {
            Some(domain) => value["domain"] = json!(domain),
            // 没有 domain 的 cookie 按目标站点 URL 注入
            None => value["url"] = json!(fallback_url),
        }
        if let Some(path) = &self.path {
            value["path"] = json!(path);
        }
        if let Some(secure) = self.secure {
            value["secure"] = json!(secure);
        }
        if let Some(http_only) = self.http_only {
            value["httpOnly"] = json!(http_only);
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// 从文件加载认证 cookie 列表
pub fn load_cookies(path: impl AsRef<Path>) -> AppResult<Vec<AuthCookie>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|_| {
        AppError::Authentication(format!(
            "未找到 cookie 文件 {}，请先在浏览器中登录并保存 cookie",
            path.display()
        ))
    })?;
    let cookies: Vec<AuthCookie> = serde_json::from_str(&text).map_err(|e| {
        AppError::Authentication(format!(
            "cookie 文件 {} 解析失败: {}，请删除后重新保存",
            path.display(),
            e
        ))
    })?;
    info!("✓ 已加载 {} 条认证 cookie", cookies.len());
    Ok(cookies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_param_uses_domain_when_present() {
        let cookie = AuthCookie {
            name: "v-authenticated".to_string(),
            value: "1".to_string(),
            domain: Some(".example.com".to_string()),
            path: Some("/".to_string()),
            secure: Some(true),
            http_only: None,
        };
        let param = cookie.to_cookie_param("https://example.com").unwrap();
        assert_eq!(param.name, "v-authenticated");
        assert_eq!(param.domain.as_deref(), Some(".example.com"));
    }

    #[test]
    fn test_cookie_param_falls_back_to_url() {
        let cookie = AuthCookie {
            name: "sid".to_string(),
            value: "abc".to_string(),
            domain: None,
            path: None,
            secure: None,
            http_only: None,
        };
        let param = cookie.to_cookie_param("https://example.com").unwrap();
        assert_eq!(param.url.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn test_load_cookies_missing_file_is_auth_error() {
        let result = load_cookies("/nonexistent/cookies.json");
        assert!(matches!(result, Err(AppError::Authentication(_))));
    }
}
