//! 兑换计划的定时执行
//!
//! 每个计划在开放兑换时间注册若干个一次性任务，任一任务成功即视为计划成功，
//! 所有任务均失败才视为失败。结果通过通道交给唯一的消费者处理，
//! 由它从用户数据中移除计划并发送通知。

use anyhow::Result;
use chrono::DateTime;
use chrono_tz::Tz;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::ApiClient;
use crate::config::{Preference, Store};
use crate::jobs::exchange::{ExchangeContext, ExchangeJob};
use crate::models::{ExchangePlan, PlanKey};
use crate::scheduler::Scheduler;
use crate::utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Success,
    Failure,
}

/// 计划的最终结果
#[derive(Debug, Clone)]
pub struct PlanEvent {
    pub key: PlanKey,
    pub plan: ExchangePlan,
    pub resolution: Resolution,
    /// 成功时为 "兑换成功"，失败时为最后一次失败的原因
    pub message: String,
}

#[derive(Debug)]
struct Tally {
    expected: usize,
    failures: usize,
    resolved: bool,
}

/// 汇总同一计划多个任务的结果，保证每个计划只产生一次结果
#[derive(Debug, Default)]
pub struct OutcomeTracker {
    tallies: Mutex<HashMap<PlanKey, Tally>>,
}

impl OutcomeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect(&self, key: PlanKey, attempts: usize) {
        self.tallies.lock().insert(
            key,
            Tally {
                expected: attempts.max(1),
                failures: 0,
                resolved: false,
            },
        );
    }

    /// 记录一次任务结果，计划首次得出结论时返回结果
    pub fn report(&self, key: &PlanKey, success: bool) -> Option<Resolution> {
        let mut tallies = self.tallies.lock();
        let tally = tallies.get_mut(key)?;
        if tally.resolved {
            return None;
        }
        if success {
            tally.resolved = true;
            return Some(Resolution::Success);
        }
        tally.failures += 1;
        if tally.failures >= tally.expected {
            tally.resolved = true;
            Some(Resolution::Failure)
        } else {
            None
        }
    }

    pub fn forget(&self, key: &PlanKey) {
        self.tallies.lock().remove(key);
    }
}

struct ArmedPlan {
    plan: ExchangePlan,
    jobs: Vec<Uuid>,
}

#[derive(Debug, Default)]
pub struct ArmReport {
    pub armed: Vec<PlanKey>,
    /// 未安排的计划及原因
    pub skipped: Vec<(PlanKey, String)>,
}

/// 已安排的计划
#[derive(Debug, Clone)]
pub struct PendingPlan {
    pub key: PlanKey,
    pub name: String,
    pub next_tick: Option<DateTime<Tz>>,
}

pub struct Dispatcher {
    scheduler: Scheduler,
    ctx: Arc<ExchangeContext>,
    armed: Mutex<HashMap<PlanKey, ArmedPlan>>,
    attempts: usize,
    misfire_grace_secs: i64,
}

impl Dispatcher {
    pub fn new(
        scheduler: Scheduler,
        store: Arc<Store>,
        api: ApiClient,
        preference: &Preference,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PlanEvent>)> {
        let latency = preference.latency_range()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(ExchangeContext {
            store,
            api,
            tracker: Arc::new(OutcomeTracker::new()),
            events: tx,
            latency,
            timezone: scheduler.timezone(),
        });
        let dispatcher = Self {
            scheduler,
            ctx,
            armed: Mutex::new(HashMap::new()),
            attempts: preference.thread_count(),
            misfire_grace_secs: preference.misfire_grace_secs.max(0),
        };
        Ok((dispatcher, rx))
    }

    /// 为每个计划在开放兑换时间注册兑换任务
    pub async fn arm_plans(&self, plans: Vec<ExchangePlan>) -> Result<ArmReport> {
        let mut report = ArmReport::default();
        let now = utils::now_secs();
        for plan in plans {
            let key = plan.key();
            if self.armed.lock().contains_key(&key) {
                report.skipped.push((key, "计划已安排".to_string()));
                continue;
            }
            let Some(open_time) = plan.good.open_time() else {
                log::warn!("{} 没有开放兑换时间，跳过", plan.good);
                report.skipped.push((key, "没有开放兑换时间".to_string()));
                continue;
            };
            if open_time < now - self.misfire_grace_secs {
                log::warn!(
                    "用户 {} - {} 已错过兑换时间 {}，跳过",
                    plan.account,
                    plan.good,
                    plan.good.time_text(self.ctx.timezone)
                );
                report.skipped.push((key, "已错过兑换时间".to_string()));
                continue;
            }

            let delay = Duration::from_secs((open_time - now).max(0) as u64);
            self.ctx.tracker.expect(key.clone(), self.attempts);
            let mut jobs = Vec::with_capacity(self.attempts);
            for attempt in 0..self.attempts {
                let job = ExchangeJob::new(plan.clone(), attempt, delay, self.ctx.clone());
                match self.scheduler.register(Arc::new(job)).await {
                    Ok(uuid) => jobs.push(uuid),
                    Err(e) => {
                        for uuid in &jobs {
                            let _ = self.scheduler.cancel(uuid).await;
                        }
                        self.ctx.tracker.forget(&key);
                        return Err(e);
                    }
                }
            }
            log::info!(
                "已安排兑换: 用户 {} - {}，时间 {}，并发 {}",
                plan.account,
                plan.good,
                plan.good.time_text(self.ctx.timezone),
                self.attempts
            );
            self.armed
                .lock()
                .insert(key.clone(), ArmedPlan { plan, jobs });
            report.armed.push(key);
        }
        Ok(report)
    }

    /// 取消尚未执行的兑换任务，返回计划是否已安排
    pub async fn cancel(&self, key: &PlanKey) -> bool {
        let Some(armed) = self.armed.lock().remove(key) else {
            return false;
        };
        for uuid in &armed.jobs {
            if let Err(e) = self.scheduler.cancel(uuid).await {
                log::debug!("移除任务 {} 失败: {}", uuid, e);
            }
        }
        self.ctx.tracker.forget(key);
        log::debug!("已取消兑换计划: {}", key);
        true
    }

    /// 已安排但尚未得出结果的计划
    pub async fn pending(&self) -> Vec<PendingPlan> {
        let armed: Vec<(PlanKey, String, Option<Uuid>)> = self
            .armed
            .lock()
            .iter()
            .map(|(key, a)| (key.clone(), a.plan.good.to_string(), a.jobs.first().copied()))
            .collect();

        let mut pending = Vec::with_capacity(armed.len());
        for (key, name, uuid) in armed {
            let next_tick = match uuid {
                Some(uuid) => self.scheduler.next_tick(uuid).await.ok().flatten(),
                None => None,
            };
            pending.push(PendingPlan {
                key,
                name,
                next_tick,
            });
        }
        pending.sort_by(|a, b| a.key.cmp(&b.key));
        pending
    }

    /// 处理计划的最终结果：从用户数据中移除计划并保存，返回计划是否仍存在
    pub async fn apply_event(&self, event: &PlanEvent) -> Result<bool> {
        // 同一计划中尚未执行的任务不再需要
        self.cancel(&event.key).await;

        let removed = self
            .ctx
            .store
            .update(|data| data.remove_plan(&event.key))
            .await?;
        match (&removed, event.resolution) {
            (None, _) => log::info!("兑换计划 {} 已不存在，忽略结果", event.key),
            (Some(_), Resolution::Success) => {
                log::info!("兑换计划 {} 成功，已从计划列表中移除", event.key)
            }
            (Some(_), Resolution::Failure) => log::warn!(
                "兑换计划 {} 全部尝试均失败（{}），已从计划列表中移除",
                event.key,
                event.message
            ),
        }
        Ok(removed.is_some())
    }
}
