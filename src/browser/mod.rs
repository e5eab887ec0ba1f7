//! 基础设施层（Browser）
//!
//! 持有稀缺的浏览器资源，只向上暴露能力：
//!
//! - `launcher` - 启动无头浏览器进程（全进程一个）
//! - `cookies` - 认证 cookie 的加载与注入参数转换
//! - `session` - 会话抽象：每个工作者独占一个已认证页面，
//!   暴露导航 / eval / 关闭能力；`SessionFactory` 支持并发创建
//!
//! 本层不认识 Collection / Recipe，不处理业务流程。

pub mod cookies;
pub mod launcher;
pub mod session;

pub use cookies::{load_cookies, AuthCookie};
pub use launcher::launch_browser;
pub use session::{CdpSession, CdpSessionFactory, Session, SessionFactory};
