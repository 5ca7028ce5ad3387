mod api;
mod chain;
mod config;
mod dispatcher;
mod error;
mod jobs;
mod models;
mod notify;
mod planner;
mod scheduler;
mod utils;

use anyhow::Result;
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use api::{ApiClient, HttpTransport, mall};
use config::{DEFAULT_CONFIG_PATH, Store};
use dispatcher::Dispatcher;
use jobs::connection_test::ConnectionTestJob;
use notify::TelegramNotifier;
use scheduler::Scheduler;

#[derive(Parser, Debug)]
#[command(author, version, about = "米游社米游币商品定时兑换工具", long_about = None)]
struct Args {
    /// 用户数据文件路径
    #[arg(short, long, env = "MYS_GOODS_TOOL_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// 刷新凭证、解析兑换请求并等待执行兑换计划（默认）
    Run,
    /// 列出商品，GAME 为分区名（如 hk4e、bh3），留空列出所有分区
    Goods {
        #[arg(default_value = "")]
        game: String,
    },
    /// 只刷新所有账号的凭证
    Refresh {
        /// 不跳过已有凭证的步骤
        #[arg(long)]
        full: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志记录器
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
    let args = Args::parse();
    log::info!("mys-goods-tool v{}", config::VERSION);

    let store = Arc::new(Store::load(&args.config)?);
    log::info!("用户数据文件: {}", store.path().display());
    let data = store.snapshot().await;
    let preference = data.preference.clone();
    let timezone = preference.timezone();

    let transport = HttpTransport::new(preference.request_timeout()?)?;
    let (device, salt) = data.device_and_salt();
    let api =
        ApiClient::new(Arc::new(transport), &preference)?.with_device_and_salt(device, salt);
    let notifier = TelegramNotifier::from_env().map(Arc::new);

    match args.command.unwrap_or(Command::Run) {
        Command::Goods { game } => list_goods(&api, &game, timezone).await,
        Command::Refresh { full } => refresh_accounts(&api, &store, full, notifier.as_deref()).await,
        Command::Run => {
            refresh_accounts(&api, &store, false, notifier.as_deref()).await?;
            resolve_requests(&api, &store).await?;
            run_scheduler(api, store, notifier, timezone).await
        }
    }
}

async fn list_goods(api: &ApiClient, game: &str, timezone: Tz) -> Result<()> {
    let goods = mall::get_good_list(api, game).await?;
    for good in &goods {
        let stock = match good.stock() {
            Some(n) => n.to_string(),
            None => "不限".to_string(),
        };
        let kind = if good.is_virtual() { "虚拟" } else { "实体" };
        let (exchanged, limit, cycle) = good.limit();
        println!(
            "{}\t{}\t{}\t{} 米游币\t库存 {}\t限购 {}/{} {}\t{}",
            good.goods_id,
            kind,
            good.name,
            good.price,
            stock,
            exchanged,
            limit,
            cycle,
            good.time_text(timezone)
        );
    }
    log::info!("共 {} 件商品", goods.len());
    Ok(())
}

/// 对每个账号执行凭证获取链并保存
async fn refresh_accounts(
    api: &ApiClient,
    store: &Store,
    full_refresh: bool,
    notifier: Option<&TelegramNotifier>,
) -> Result<()> {
    let accounts = store.snapshot().await.accounts;
    if accounts.is_empty() {
        log::warn!("用户数据中没有账号，请在 {} 中添加", store.path().display());
    }
    for (uid, mut account) in accounts {
        let report =
            chain::derive_credentials(api, &mut account.cookies, &account.device_id_ios, full_refresh)
                .await;
        let cookies = account.cookies.clone();
        store
            .update(|data| {
                if let Some(saved) = data.accounts.get_mut(&uid) {
                    saved.cookies = cookies;
                }
                data.normalize();
            })
            .await?;

        if let Some((step, e)) = &report.failed {
            log::error!("账号 {} 凭证刷新失败 ({}): {}", uid, step, e);
            if let Some(n) = notifier {
                n.notify_failure(&format!("账号 {uid} 凭证刷新失败"), &e.to_string())
                    .await;
            }
            continue;
        }
        log::info!(
            "账号 {} 凭证刷新完成，完成 {} 步，跳过 {} 步",
            uid,
            report.completed.len(),
            report.skipped.len()
        );
        match mall::get_user_points(api, &account).await {
            Ok(points) => log::info!("账号 {} 当前米游币: {}", uid, points),
            Err(e) => log::warn!("获取账号 {} 米游币数量失败: {}", uid, e),
        }
    }
    Ok(())
}

/// 将配置中的兑换请求转换为兑换计划，失败的请求保留到下次启动
async fn resolve_requests(api: &ApiClient, store: &Store) -> Result<()> {
    let requests = store.snapshot().await.plan_requests;
    let mut failed = Vec::new();
    for request in requests {
        match planner::resolve_request(api, store, &request).await {
            Ok(plan) => {
                let name = plan.good.to_string();
                if store.update(|data| data.add_plan(plan)).await? {
                    log::info!("已添加兑换计划: 用户 {} - {}", request.account, name);
                } else {
                    log::info!("兑换计划已存在: 用户 {} - {}", request.account, name);
                }
            }
            Err(e) => {
                log::error!(
                    "用户 {} 商品 {} 无法创建兑换计划: {}",
                    request.account,
                    request.goods_id,
                    e
                );
                failed.push(request);
            }
        }
    }
    store.update(|data| data.plan_requests = failed).await?;
    Ok(())
}

async fn run_scheduler(
    api: ApiClient,
    store: Arc<Store>,
    notifier: Option<Arc<TelegramNotifier>>,
    timezone: Tz,
) -> Result<()> {
    let preference = store.preference().await;
    let scheduler = Scheduler::new(timezone).await?;
    let (dispatcher, mut events) =
        Dispatcher::new(scheduler.clone(), store.clone(), api, &preference)?;
    let dispatcher = Arc::new(dispatcher);

    let plans = store.snapshot().await.exchange_plans;
    let report = dispatcher.arm_plans(plans).await?;
    for (key, reason) in &report.skipped {
        log::warn!("未安排兑换计划 {}: {}", key, reason);
    }
    if report.armed.is_empty() {
        log::warn!("没有需要执行的兑换计划，退出");
        return Ok(());
    }
    for pending in dispatcher.pending().await {
        let next = pending
            .next_tick
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "未知".to_string());
        log::info!("待执行: {} - {}，下次执行 {}", pending.key.account, pending.name, next);
    }

    if let Some(job) = ConnectionTestJob::from_preference(&preference)? {
        scheduler.register(Arc::new(job)).await?;
    }

    // 唯一的兑换结果消费者
    let consumer = dispatcher.clone();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Err(e) = consumer.apply_event(&event).await {
                log::error!("保存兑换结果失败: {:#}", e);
            }
            if let Some(ref n) = notifier {
                n.notify_resolution(&event, timezone).await;
            }
            if consumer.pending().await.is_empty() {
                log::info!("所有兑换计划均已执行完毕，按 Ctrl+C 退出");
            }
        }
    });

    scheduler.start_and_wait().await?;
    Ok(())
}
