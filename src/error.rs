//! 应用程序错误类型
//!
//! 错误按影响范围分为三档：
//! - 致命错误（认证失败）：中止整个运行，不调度任何任务
//! - 合集级错误（发现失败）：跳过该合集，运行继续
//! - 食谱级错误（抓取 / 提取 / 写出失败）：跳过该食谱，兄弟任务不受影响
//!
//! 生命周期违规（乱序的状态转移）只记录警告并拒绝本次操作，不视为失败。

use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 认证失败 - 会话不可信，运行必须在调度前中止
    #[error("认证失败: {0}")]
    Authentication(String),

    /// 合集发现失败 - 该合集被跳过，其他合集继续
    #[error("合集发现失败 ({collection}): {message}")]
    Discovery { collection: String, message: String },

    /// 食谱详情页抓取失败（导航超时等）
    #[error("食谱详情页抓取失败 ({url}): {message}")]
    DetailFetch { url: String, message: String },

    /// 页面内容提取失败
    #[error("页面内容提取失败: {0}")]
    Extraction(String),

    /// 导出记录写入失败
    #[error("导出写入失败 ({path}): {source}")]
    ExportWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// 生命周期顺序违规 - 操作被拒绝，但不是可重试错误
    #[error("生命周期顺序违规: 食谱 {id} 不允许 {from} → {to}")]
    LifecycleViolation {
        id: String,
        from: String,
        to: String,
    },

    /// 浏览器协议错误
    #[error("浏览器错误: {0}")]
    Browser(#[from] chromiumoxide::error::CdpError),

    /// 配置错误（非法正则、非法取值）
    #[error("配置错误: {0}")]
    Config(String),

    /// 文件操作错误
    #[error("文件错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 解析失败
    #[error("JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建合集发现错误
    pub fn discovery(collection: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Discovery {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// 创建详情页抓取错误
    pub fn detail_fetch(url: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::DetailFetch {
            url: url.into(),
            message: message.into(),
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
