pub mod connection_test;
pub mod exchange;

use anyhow::Result;
use async_trait::async_trait;

use crate::scheduler::Trigger;

/// Job trait - 所有定时任务都需要实现此 trait
#[async_trait]
pub trait Job: Send + Sync {
    /// 任务名称
    fn name(&self) -> &str;

    /// 触发方式
    fn trigger(&self) -> Trigger;

    /// 执行任务
    async fn run(&self) -> Result<()>;
}
