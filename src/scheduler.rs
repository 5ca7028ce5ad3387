use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::jobs::Job;

/// 任务的触发方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// 延迟指定时间后执行一次
    After(Duration),
    /// 每隔指定时间执行一次
    Every(Duration),
}

async fn run_job<J: Job>(job: Arc<J>) {
    let job_name = job.name().to_string();
    log::debug!("[{}] 定时任务触发", job_name);
    match job.run().await {
        Ok(_) => log::debug!("[{}] 任务执行完成", job_name),
        Err(e) => log::error!("[{}] 任务执行失败: {}", job_name, e),
    }
}

/// 调度器 - 管理所有定时任务
#[derive(Clone)]
pub struct Scheduler {
    inner: JobScheduler,
    timezone: Tz,
}

impl Scheduler {
    pub async fn new(timezone: Tz) -> Result<Self> {
        let inner = JobScheduler::new().await?;
        log::info!("调度器时区: {}", timezone);
        Ok(Self { inner, timezone })
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// 注册一个 Job，返回其在调度器中的 ID
    pub async fn register<J: Job + 'static>(&self, job: Arc<J>) -> Result<Uuid> {
        let job_name = job.name().to_string();
        let trigger = job.trigger();

        let cron_job = match trigger {
            Trigger::After(delay) => CronJob::new_one_shot_async(delay, move |_uuid, _l| {
                Box::pin(run_job(job.clone()))
            })?,
            Trigger::Every(interval) => {
                CronJob::new_repeated_async(interval, move |_uuid, _l| {
                    Box::pin(run_job(job.clone()))
                })?
            }
        };

        let uuid = self.inner.add(cron_job).await?;
        log::debug!("已注册任务: {} ({:?})", job_name, trigger);
        Ok(uuid)
    }

    /// 移除尚未执行的任务
    pub async fn cancel(&self, uuid: &Uuid) -> Result<()> {
        self.inner.remove(uuid).await?;
        Ok(())
    }

    /// 任务下一次执行的时间
    pub async fn next_tick(&self, uuid: Uuid) -> Result<Option<DateTime<Tz>>> {
        let mut inner = self.inner.clone();
        let next: Option<DateTime<Utc>> = inner.next_tick_for_job(uuid).await?;
        Ok(next.map(|t| t.with_timezone(&self.timezone)))
    }

    pub async fn start(&self) -> Result<()> {
        self.inner.start().await?;
        Ok(())
    }

    /// 启动调度器并等待退出信号
    pub async fn start_and_wait(mut self) -> Result<()> {
        let token = CancellationToken::new();
        let token_clone = token.clone();
        self.inner.set_shutdown_handler(Box::new(move || {
            let token_for_future = token_clone.clone();
            Box::pin(async move {
                log::warn!("调度器已停止运行");
                token_for_future.cancel();
            })
        }));

        // 监听 SIGINT 和 SIGTERM 信号
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let token_for_signals = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => {
                    log::info!("收到 SIGINT 信号，正在关闭...");
                }
                _ = sigterm.recv() => {
                    log::info!("收到 SIGTERM 信号，正在关闭...");
                }
            }
            token_for_signals.cancel();
        });

        self.start().await?;
        log::info!("调度器已启动，按 Ctrl+C 或发送 SIGTERM 退出...");
        token.cancelled().await;

        self.inner.shutdown().await?;
        log::info!("调度器已关闭");
        Ok(())
    }
}
