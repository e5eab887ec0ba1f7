//! # Recipe Dump
//!
//! 一个用于并发导出个人食谱库的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Browser）
//! - `browser/` - 持有稀缺资源（浏览器页面），只暴露能力
//! - `Session` / `SessionFactory` - 已认证会话的创建、导航、eval、关闭能力
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个页面或单条记录
//! - `PageExtractor` - 合集页 / 食谱详情页的内容提取能力
//! - `CollectionDiscovery` - 引导会话上的合集发现能力
//! - `OutputSink` - 清单 / JSON 记录 / 总索引的写出能力
//! - `PageLogger` - 页面抓取与生命周期事件的计时日志能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一条食谱"的完整处理流程
//! - `RecipeCtx` - 上下文封装（合集标题 + 类型 + 工作者标签）
//! - `RecipeFlow` - 流程编排（导航 → 提取 → 导出 → 状态转移）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/run` - 运行协调器，管理资源、发现合集、控制并发
//! - `orchestrator/collection_processor` - 单个合集处理器，认领并分发食谱
//!
//! ## 共享状态
//!
//! - `tracker` - 全进程唯一的状态追踪器：去重认领、生命周期状态机、
//!   计数器与错误列表；所有并发修改都经过它的同步方法
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod tracker;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use browser::{CdpSession, CdpSessionFactory, Session, SessionFactory};
pub use config::{Config, FilterPatterns};
pub use error::{AppError, AppResult};
pub use models::{Collection, CollectionKind, Recipe, RecipeRef, RecipeState};
pub use orchestrator::{App, RunReport};
pub use services::{OutputSink, PageExtractor, PageLogger};
pub use tracker::{StateSnapshot, StateTracker};
pub use workflow::{ProcessResult, RecipeCtx, RecipeFlow};
