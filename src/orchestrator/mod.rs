//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责两级并发调度和资源管理，是整个系统的"指挥中心"。
//!
//! ### `run` - 运行协调器
//! - 管理应用生命周期（初始化、运行、汇总）
//! - 引导会话上的单线程合集发现与认证校验
//! - 外层合集池（Semaphore）+ 全局共享的内层食谱池
//! - 按 (类型, 标题) 排序写出总索引
//! - 输出全局统计信息
//!
//! ### `collection_processor` - 单个合集处理器
//! - 独占会话完成合集页发现
//! - 通过状态追踪器认领食谱并提交到共享池
//! - 写出合集清单，批次完成后做内存清理
//! - 输出单个合集的统计信息
//!
//! ## 层次关系
//!
//! ```text
//! run (处理 Vec<Collection>)
//!     ↓
//! collection_processor (处理单个 Collection)
//!     ↓
//! workflow::RecipeFlow (处理单条 RecipeRef)
//!     ↓
//! services (能力层：extractor / sink / page_logger)
//!     ↓
//! browser (基础设施：Session / SessionFactory)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：run 管全局，collection_processor 管单个合集
//! 2. **资源隔离**：会话由使用它的任务独占，追踪器是唯一共享可变状态
//! 3. **向下依赖**：编排层 → workflow → services → browser
//! 4. **故障隔离**：失败被就地记录，工作池永远看不到未处理的崩溃

pub mod collection_processor;
pub mod run;

// 重新导出主要类型
pub use collection_processor::{process_collection, CollectionDeps};
pub use run::{build_master_index, should_process_collection, App, IndexEntry, RunReport};
