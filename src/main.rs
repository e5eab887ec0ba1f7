use anyhow::Result;
use recipe_dump::orchestrator::App;
use recipe_dump::utils::logging;
use recipe_dump::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置（config.toml 可选，环境变量覆盖）
    let config = Config::load()?;

    // 初始化日志
    logging::init(config.verbose_logging);

    // 初始化并运行应用
    let _report = App::initialize(config).await?.run().await?;

    Ok(())
}
