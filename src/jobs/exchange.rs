use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono_tz::Tz;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::sleep;

use super::Job;
use crate::api::ApiClient;
use crate::api::mall::{self, ExchangeOutcome};
use crate::config::Store;
use crate::dispatcher::{OutcomeTracker, PlanEvent};
use crate::error::Precondition;
use crate::models::{ExchangePlan, PlanKey};
use crate::scheduler::Trigger;

/// 所有兑换任务共享的资源
pub struct ExchangeContext {
    pub store: Arc<Store>,
    pub api: ApiClient,
    pub tracker: Arc<OutcomeTracker>,
    pub events: UnboundedSender<PlanEvent>,
    /// 随机延迟范围
    pub latency: (Duration, Duration),
    pub timezone: Tz,
}

impl ExchangeContext {
    fn jitter(&self) -> Duration {
        let (lo, hi) = self.latency;
        if hi <= lo {
            return lo;
        }
        rand::rng().random_range(lo..hi)
    }
}

/// 某个兑换计划的一次兑换尝试
pub struct ExchangeJob {
    name: String,
    plan: ExchangePlan,
    key: PlanKey,
    delay: Duration,
    ctx: Arc<ExchangeContext>,
}

impl ExchangeJob {
    pub fn new(
        plan: ExchangePlan,
        attempt: usize,
        delay: Duration,
        ctx: Arc<ExchangeContext>,
    ) -> Self {
        Self {
            name: format!("兑换 {} #{}", plan.good, attempt + 1),
            key: plan.key(),
            plan,
            delay,
            ctx,
        }
    }

    /// 返回 (是否成功, 结果描述)
    async fn attempt(&self) -> (bool, String) {
        let Some(account) = self.ctx.store.account(&self.plan.account).await else {
            let e = Precondition::AccountNotFound;
            log::error!("用户 {} 兑换商品 {} 失败: {}", self.plan.account, self.plan.good, e);
            return (false, e.to_string());
        };

        match mall::good_exchange(&self.ctx.api, &self.plan, &account).await {
            Ok(ExchangeOutcome::Redeemed { raw }) => {
                log::info!("用户 {} 商品 {} 兑换成功", self.plan.account, self.plan.good);
                log::debug!("服务器返回: {raw}");
                (true, "兑换成功".to_string())
            }
            Ok(ExchangeOutcome::Rejected { message, raw }) => {
                log::error!(
                    "用户 {} 商品 {} 兑换失败: {}",
                    self.plan.account,
                    self.plan.good,
                    message
                );
                log::debug!("服务器返回: {raw}");
                (false, message)
            }
            Err(e) => {
                log::error!(
                    "用户 {} 商品 {} 兑换请求出错: {}",
                    self.plan.account,
                    self.plan.good,
                    e
                );
                (false, e.to_string())
            }
        }
    }
}

#[async_trait]
impl Job for ExchangeJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn trigger(&self) -> Trigger {
        Trigger::After(self.delay)
    }

    async fn run(&self) -> Result<()> {
        let jitter = self.ctx.jitter();
        if !jitter.is_zero() {
            sleep(jitter).await;
        }
        log::info!(
            "开始兑换: 用户 {} - {} (开放时间 {})",
            self.plan.account,
            self.plan.good,
            self.plan.good.time_text(self.ctx.timezone)
        );

        let (success, message) = self.attempt().await;
        if let Some(resolution) = self.ctx.tracker.report(&self.key, success) {
            let event = PlanEvent {
                key: self.key.clone(),
                plan: self.plan.clone(),
                resolution,
                message: message.clone(),
            };
            if self.ctx.events.send(event).is_err() {
                log::warn!("兑换结果通道已关闭，{} 的结果未能保存", self.key);
            }
        }

        if success { Ok(()) } else { Err(anyhow!(message)) }
    }
}
