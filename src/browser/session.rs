//! 会话抽象 - 基础设施层
//!
//! "会话"是一个已认证、可导航的浏览器页面句柄：创建昂贵，使用期间被
//! 一个工作者独占，用完必须在所有退出路径上关闭。
//!
//! `Session` / `SessionFactory` 以 trait 形式暴露，编排层与流程层只依赖
//! 这两个能力；生产实现基于 CDP（chromiumoxide），测试可以用内存实现替换。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chromiumoxide::{Browser, Page};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::browser::cookies::AuthCookie;
use crate::error::AppError;

/// 一个已认证的浏览器会话
///
/// 职责：
/// - 持有唯一的页面资源
/// - 暴露导航 / eval / 标题读取 / 关闭能力
/// - 不认识 Collection / Recipe
/// - 不处理业务流程
#[async_trait]
pub trait Session: Send + Sync {
    /// 导航到指定 URL（受页面加载超时约束）
    async fn navigate(&self, url: &str) -> Result<()>;

    /// 在当前页面执行 JS 并返回 JSON 结果
    async fn eval(&self, js_code: String) -> Result<JsonValue>;

    /// 当前页面标题
    async fn title(&self) -> Result<Option<String>>;

    /// 当前页面地址
    async fn url(&self) -> Result<Option<String>>;

    /// 关闭会话，释放页面资源
    async fn close(self: Box<Self>) -> Result<()>;
}

/// 会话工厂：支持被多个工作者并发调用
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn Session>>;
}

/// CDP 会话：浏览器上的一个独立页面
pub struct CdpSession {
    page: Page,
    page_load_timeout: Duration,
}

#[async_trait]
impl Session for CdpSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        let goto = self.page.goto(url);
        match tokio::time::timeout(self.page_load_timeout, goto).await {
            Ok(result) => {
                result?;
                Ok(())
            }
            Err(_) => Err(AppError::detail_fetch(
                url,
                format!("页面加载超过 {} 秒", self.page_load_timeout.as_secs()),
            )
            .into()),
        }
    }

    async fn eval(&self, js_code: String) -> Result<JsonValue> {
        let result = self.page.evaluate(js_code).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    async fn title(&self) -> Result<Option<String>> {
        Ok(self.page.get_title().await?)
    }

    async fn url(&self) -> Result<Option<String>> {
        Ok(self.page.url().await?)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.page.close().await?;
        Ok(())
    }
}

/// CDP 会话工厂
///
/// 持有浏览器句柄与只读的认证 cookie；每次 `create` 打开一个新页面
/// 并注入全部 cookie。
pub struct CdpSessionFactory {
    browser: Browser,
    cookies: Arc<Vec<AuthCookie>>,
    base_url: String,
    page_load_timeout: Duration,
}

impl CdpSessionFactory {
    pub fn new(
        browser: Browser,
        cookies: Vec<AuthCookie>,
        base_url: impl Into<String>,
        page_load_timeout: Duration,
    ) -> Self {
        Self {
            browser,
            cookies: Arc::new(cookies),
            base_url: base_url.into(),
            page_load_timeout,
        }
    }
}

#[async_trait]
impl SessionFactory for CdpSessionFactory {
    async fn create(&self) -> Result<Box<dyn Session>> {
        let page = self.browser.new_page("about:blank").await?;

        if !self.cookies.is_empty() {
            let mut params = Vec::with_capacity(self.cookies.len());
            for cookie in self.cookies.iter() {
                // 个别 cookie 对当前上下文无效是正常情况
                match cookie.to_cookie_param(&self.base_url) {
                    Ok(param) => params.push(param),
                    Err(e) => debug!("跳过无效 cookie {}: {}", cookie.name, e),
                }
            }
            page.set_cookies(params).await?;
        }

        debug!("✓ 已创建新会话并注入认证 cookie");
        Ok(Box::new(CdpSession {
            page,
            page_load_timeout: self.page_load_timeout,
        }))
    }
}
