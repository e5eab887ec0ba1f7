//! 食谱处理上下文
//!
//! 封装"我正在替哪个合集处理这条食谱"这一信息

use std::fmt::Display;

use crate::models::CollectionKind;

/// 食谱处理上下文
///
/// 包含处理单条食谱所需的所有上下文信息
#[derive(Debug, Clone)]
pub struct RecipeCtx {
    /// 所属合集标题（仅用于日志显示）
    pub collection_title: String,

    /// 所属合集类型（决定提取规则）
    pub kind: CollectionKind,

    /// 工作者标签（计时日志用）
    pub worker: String,
}

impl RecipeCtx {
    /// 创建新的食谱上下文
    pub fn new(collection_title: String, kind: CollectionKind, worker: String) -> Self {
        Self {
            collection_title,
            kind,
            worker,
        }
    }
}

impl Display for RecipeCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[合集 {} 类型#{} 工作者#{}]",
            self.collection_title, self.kind, self.worker
        )
    }
}
