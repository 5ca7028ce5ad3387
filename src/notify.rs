use anyhow::Result;
use chrono_tz::Tz;
use reqwest::Client;
use std::env;

use crate::dispatcher::{PlanEvent, Resolution};

/// Telegram 通知器
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    /// 从环境变量创建通知器
    pub fn from_env() -> Option<Self> {
        let bot_token = env::var("TELEGRAM_BOT_TOKEN").ok()?;
        let chat_id = env::var("TELEGRAM_CHAT_ID").ok()?;

        log::info!("Telegram 通知已启用");
        Some(Self {
            client: Client::new(),
            bot_token,
            chat_id,
        })
    }

    /// 发送消息
    pub async fn send(&self, message: &str) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);

        let params = [
            ("chat_id", self.chat_id.as_str()),
            ("text", message),
            ("parse_mode", "HTML"),
        ];

        let resp = self.client.post(&url).form(&params).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram 返回 {}: {}", status, body);
        }
        log::debug!("Telegram 消息发送成功");
        Ok(())
    }

    /// 发送兑换结果通知
    pub async fn notify_resolution(&self, event: &PlanEvent, timezone: Tz) {
        let message = resolution_message(event, timezone);
        if let Err(e) = self.send(&message).await {
            log::error!("发送兑换结果通知失败: {}", e);
        }
    }

    /// 发送账号凭证失效等需要人工处理的通知
    pub async fn notify_failure(&self, title: &str, error: &str) {
        let message = format!("❌ <b>{}</b>\n错误: {}", escape(title), escape(error));
        if let Err(e) = self.send(&message).await {
            log::error!("发送失败通知失败: {}", e);
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn resolution_message(event: &PlanEvent, timezone: Tz) -> String {
    let good = &event.plan.good;
    let head = match event.resolution {
        Resolution::Success => "✅ <b>兑换成功</b>",
        Resolution::Failure => "❌ <b>兑换失败</b>",
    };
    let mut message = format!(
        "{}\n用户: {}\n商品: {}\n时间: {}",
        head,
        event.plan.account,
        escape(&good.to_string()),
        good.time_text(timezone)
    );
    if event.resolution == Resolution::Failure {
        message.push_str(&format!("\n原因: {}", escape(&event.message)));
    }
    message
}
