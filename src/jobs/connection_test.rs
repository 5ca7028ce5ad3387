use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::Job;
use crate::api::URL_EXCHANGE;
use crate::config::Preference;
use crate::scheduler::Trigger;

/// 定时测试与兑换服务器之间的连接延迟
pub struct ConnectionTestJob {
    name: String,
    host: String,
    port: u16,
    interval: Duration,
    timeout: Duration,
}

impl ConnectionTestJob {
    /// 未启用连接测试时返回 None
    pub fn from_preference(preference: &Preference) -> Result<Option<Self>> {
        if !preference.enable_connection_test {
            return Ok(None);
        }
        let url = reqwest::Url::parse(URL_EXCHANGE)?;
        let host = url.host_str().context("兑换接口地址缺少主机名")?.to_string();
        let port = url.port_or_known_default().unwrap_or(443);
        Ok(Some(Self {
            name: format!("连接测试 {host}"),
            host,
            port,
            interval: Duration::from_secs(preference.connection_test_interval.max(1)),
            timeout: preference.request_timeout()?,
        }))
    }

    /// 建立 TCP 连接所用时间
    pub async fn measure(&self) -> Result<Duration> {
        let start = Instant::now();
        timeout(self.timeout, TcpStream::connect((self.host.as_str(), self.port)))
            .await
            .context("连接超时")??;
        Ok(start.elapsed())
    }
}

#[async_trait]
impl Job for ConnectionTestJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn trigger(&self) -> Trigger {
        Trigger::Every(self.interval)
    }

    async fn run(&self) -> Result<()> {
        match self.measure().await {
            Ok(latency) => log::info!(
                "{}:{} 连接延迟 {:.2} ms",
                self.host,
                self.port,
                latency.as_secs_f64() * 1000.0
            ),
            Err(e) => log::warn!("{}:{} 连接测试失败: {:#}", self.host, self.port, e),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn disabled_by_preference() {
        let preference = Preference {
            enable_connection_test: false,
            ..Default::default()
        };
        assert!(ConnectionTestJob::from_preference(&preference).unwrap().is_none());
    }

    #[test]
    fn targets_exchange_host() {
        let job = ConnectionTestJob::from_preference(&Preference::default())
            .unwrap()
            .unwrap();
        assert_eq!(job.host, "api-takumi.miyoushe.com");
        assert_eq!(job.port, 443);
        assert_eq!(job.trigger(), Trigger::Every(Duration::from_secs(30)));
    }

    #[test]
    fn oversized_timeout_is_rejected() {
        let preference = Preference {
            timeout: 1e20,
            ..Default::default()
        };
        assert!(ConnectionTestJob::from_preference(&preference).is_err());
    }

    #[tokio::test]
    async fn measures_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let job = ConnectionTestJob {
            name: "local".into(),
            host: "127.0.0.1".into(),
            port,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(2),
        };
        assert!(job.measure().await.is_ok());
    }
}
