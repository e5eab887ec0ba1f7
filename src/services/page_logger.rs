//! 页面计时日志服务 - 业务能力层
//!
//! 每次导航和每次生命周期事件写一行：时间戳、工作者标签、
//! 距该工作者上一条日志的耗时。纯观测用途，核心逻辑绝不读回。
//!
//! 进程级状态，启动时显式构造一次，以 `Arc<PageLogger>` 注入每个工作者，
//! 不使用隐藏的全局单例。写失败只降级为 debug 日志，绝不让运行失败。

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use tracing::debug;

/// 页面计时日志
pub struct PageLogger {
    log_path: PathBuf,
    /// 工作者标签 → 上一条日志的时刻；文件追加也在同一把锁下串行化
    inner: Mutex<HashMap<String, Instant>>,
}

impl PageLogger {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// 记录一次页面导航
    pub fn log_navigation(&self, worker: &str, url: &str) {
        self.append(worker, "GET", url);
    }

    /// 记录一次生命周期事件（START / COMPLETE / ERROR 等）
    pub fn log_event(&self, worker: &str, operation: &str, context: &str) {
        self.append(worker, operation, context);
    }

    fn append(&self, worker: &str, operation: &str, context: &str) {
        let now = Instant::now();
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");

        let mut timings = self.inner.lock().expect("计时日志的锁已中毒");
        let elapsed = timings
            .insert(worker.to_string(), now)
            .map(|last| now.duration_since(last).as_secs_f64() * 1000.0)
            .unwrap_or(0.0);

        let line = if context.is_empty() {
            format!("{} - {} [+{:.1}ms] {}\n", timestamp, worker, elapsed, operation)
        } else {
            format!(
                "{} - {} [+{:.1}ms] {}: {}\n",
                timestamp, worker, elapsed, operation, context
            )
        };

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            debug!("计时日志写入失败 ({}): {}", self.log_path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_carry_worker_tag_and_elapsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let logger = PageLogger::new(&path);

        logger.log_navigation("collection-1", "https://x/c1");
        logger.log_event("collection-1", "START collection", "Soups");
        logger.log_event("recipe-2", "COMPLETE recipe", "Tomato Soup");

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("collection-1 [+0.0ms] GET: https://x/c1"));
        assert!(lines[1].contains("START collection: Soups"));
        // 不同工作者的计时互不影响，第一条总是 +0.0ms
        assert!(lines[2].contains("recipe-2 [+0.0ms]"));
    }
}
