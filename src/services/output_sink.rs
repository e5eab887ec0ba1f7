//! 输出写出服务 - 业务能力层
//!
//! 只负责"写出"能力：每个合集一份清单文件、每条食谱一个 JSON 记录、
//! 一份总索引。不关心流程顺序，不出现 Vec<Recipe>。

use std::path::PathBuf;

use serde_json::Value as JsonValue;
use tracing::warn;

use crate::error::{AppError, AppResult};

/// 输出写出能力
///
/// 清单与总索引的实际行数和期望行数不一致时发出警告（非致命）。
pub trait OutputSink: Send + Sync {
    /// 写出一个合集的清单文本
    fn write_collection_listing(&self, label: &str, text: &str, expected_lines: usize)
        -> AppResult<()>;

    /// 持久化写出一条食谱的导出记录
    fn write_recipe_record(&self, id: &str, record: &JsonValue) -> AppResult<()>;

    /// 写出总索引
    fn write_master_index(&self, text: &str, expected_lines: usize) -> AppResult<()>;
}

/// 文件系统写出实现
pub struct FsOutputSink {
    output_dir: PathBuf,
    json_dir: String,
}

impl FsOutputSink {
    pub fn new(output_dir: impl Into<PathBuf>, json_dir: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            json_dir: json_dir.into(),
        }
    }

    /// 写出 UTF-8 文本文件，校验行数
    fn save_text(&self, filename: &str, text: &str, expected_lines: usize) -> AppResult<()> {
        // 标题可能含路径分隔符
        let filename = filename.replace(['/', '\\'], "_");
        let path = self.output_dir.join(&filename);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, text).map_err(|e| AppError::ExportWrite {
            path: path.display().to_string(),
            source: e,
        })?;

        let lines = text.matches('\n').count();
        if lines != expected_lines {
            warn!(
                "⚠️ {} 实际 {} 行，期望 {} 行",
                filename, lines, expected_lines
            );
        }
        Ok(())
    }
}

impl OutputSink for FsOutputSink {
    fn write_collection_listing(
        &self,
        label: &str,
        text: &str,
        expected_lines: usize,
    ) -> AppResult<()> {
        self.save_text(label, text, expected_lines)
    }

    fn write_recipe_record(&self, id: &str, record: &JsonValue) -> AppResult<()> {
        let path = self
            .output_dir
            .join(&self.json_dir)
            .join(format!("{}.json", id));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(record)?;
        std::fs::write(&path, text).map_err(|e| AppError::ExportWrite {
            path: path.display().to_string(),
            source: e,
        })
    }

    fn write_master_index(&self, text: &str, expected_lines: usize) -> AppResult<()> {
        self.save_text("Master Index", text, expected_lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_listing_written_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsOutputSink::new(dir.path(), "json_food");
        sink.write_collection_listing("custom Soups", "r1\tu\tFirst\n", 1)
            .unwrap();
        let text = std::fs::read_to_string(dir.path().join("custom Soups")).unwrap();
        assert_eq!(text, "r1\tu\tFirst\n");
    }

    #[test]
    fn test_recipe_record_lands_in_json_dir() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsOutputSink::new(dir.path(), "json_food");
        sink.write_recipe_record("r42", &json!({"name": "Soup"}))
            .unwrap();
        let text = std::fs::read_to_string(dir.path().join("json_food").join("r42.json")).unwrap();
        assert!(text.contains("\"name\""));
    }

    #[test]
    fn test_label_with_slash_is_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsOutputSink::new(dir.path(), "json_food");
        sink.write_collection_listing("custom A/B", "x\n", 1).unwrap();
        assert!(dir.path().join("custom A_B").exists());
    }

    #[test]
    fn test_line_count_mismatch_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsOutputSink::new(dir.path(), "json_food");
        // 期望 5 行但只有 1 行：只警告，不报错
        assert!(sink.write_collection_listing("custom X", "one\n", 5).is_ok());
    }
}
