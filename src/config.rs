use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::api::headers;
use crate::models::{ExchangePlan, PlanKey, PlanRequest, UserAccount};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_CONFIG_PATH: &str = "user_data.json";

/// 兑换接口所处的 API 版本，决定兑换所需的最小凭证
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiGeneration {
    /// 只需 cookie_token，游戏内物品另需任意 stoken
    V1,
    /// 游戏内物品若只有 stoken_v2，还需要 mid
    #[default]
    V2,
}

/// 偏好设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preference {
    pub enable_connection_test: bool,
    /// 连接测试间隔（秒）
    pub connection_test_interval: u64,
    /// 网络请求超时时间（秒）
    pub timeout: f64,
    /// 最大网络请求重试次数（兑换请求除外）
    pub max_retry_times: u32,
    /// 网络请求重试间隔（秒）
    pub retry_interval: f64,
    pub timezone: String,
    /// 每个兑换计划同时发出的请求数
    pub exchange_thread_count: usize,
    /// 兑换时间延迟随机范围（秒），避免请求时间过于精准
    pub exchange_latency: (f64, f64),
    /// 兑换时间已过多久以内仍立即执行（秒）
    pub misfire_grace_secs: i64,
    pub api_generation: ApiGeneration,
    /// 使用用户数据文件中的 device_config 和 salt_config 而不是内置值
    pub override_device_and_salt: bool,
}

impl Default for Preference {
    fn default() -> Self {
        Preference {
            enable_connection_test: true,
            connection_test_interval: 30,
            timeout: 10.0,
            max_retry_times: 3,
            retry_interval: 2.0,
            timezone: "Asia/Shanghai".to_string(),
            exchange_thread_count: 2,
            exchange_latency: (0.0, 0.2),
            misfire_grace_secs: 60,
            api_generation: ApiGeneration::default(),
            override_device_and_salt: false,
        }
    }
}

impl Preference {
    /// `TZ` 环境变量优先于配置文件
    pub fn timezone(&self) -> Tz {
        let tz_str = env::var("TZ").unwrap_or_else(|_| self.timezone.clone());
        tz_str.parse().unwrap_or(chrono_tz::Asia::Shanghai)
    }

    pub fn thread_count(&self) -> usize {
        self.exchange_thread_count.max(1)
    }

    pub fn request_timeout(&self) -> anyhow::Result<Duration> {
        seconds("timeout", self.timeout.max(0.1))
    }

    pub fn retry_delay(&self) -> anyhow::Result<Duration> {
        seconds("retry_interval", self.retry_interval.max(0.0))
    }

    /// 兑换时间随机延迟的上下限
    pub fn latency_range(&self) -> anyhow::Result<(Duration, Duration)> {
        let (lo, hi) = self.exchange_latency;
        let lo = seconds("exchange_latency", lo.max(0.0))?;
        let hi = seconds("exchange_latency", hi.max(0.0))?;
        Ok((lo, hi.max(lo)))
    }
}

fn seconds(name: &str, value: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value)
        .with_context(|| format!("偏好设置 {name} 的值 {value} 不是有效的秒数"))
}

/// 生成 Headers 中 DS 所用的 salt，非必要请勿修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SaltConfig {
    pub salt_ios: String,
    pub salt_prod: String,
}

impl Default for SaltConfig {
    fn default() -> Self {
        SaltConfig {
            salt_ios: headers::SALT_IOS.to_string(),
            salt_prod: headers::SALT_PROD.to_string(),
        }
    }
}

/// Headers 所用的设备信息，非必要请勿修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DeviceConfig {
    pub user_agent_mobile: String,
    pub user_agent_pc: String,
    /// 米游社通行证接口所用的 User-Agent
    pub user_agent_other: String,
    pub x_rpc_device_model_mobile: String,
    pub x_rpc_device_name_mobile: String,
    pub x_rpc_sys_version: String,
    pub x_rpc_channel: String,
    pub x_rpc_app_version: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            user_agent_mobile: headers::USER_AGENT_MOBILE.to_string(),
            user_agent_pc: headers::USER_AGENT_PC.to_string(),
            user_agent_other: headers::USER_AGENT_OTHER.to_string(),
            x_rpc_device_model_mobile: headers::X_RPC_DEVICE_MODEL_MOBILE.to_string(),
            x_rpc_device_name_mobile: headers::X_RPC_DEVICE_NAME_MOBILE.to_string(),
            x_rpc_sys_version: headers::X_RPC_SYS_VERSION.to_string(),
            x_rpc_channel: headers::X_RPC_CHANNEL.to_string(),
            x_rpc_app_version: headers::X_RPC_APP_VERSION.to_string(),
        }
    }
}

/// 用户数据文件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserData {
    pub version: String,
    pub accounts: BTreeMap<String, UserAccount>,
    pub exchange_plans: Vec<ExchangePlan>,
    /// 启动时解析为兑换计划的请求
    pub plan_requests: Vec<PlanRequest>,
    pub preference: Preference,
    pub salt_config: SaltConfig,
    pub device_config: DeviceConfig,
}

impl Default for UserData {
    fn default() -> Self {
        UserData {
            version: VERSION.to_string(),
            accounts: BTreeMap::new(),
            exchange_plans: Vec::new(),
            plan_requests: Vec::new(),
            preference: Preference::default(),
            salt_config: SaltConfig::default(),
            device_config: DeviceConfig::default(),
        }
    }
}

impl UserData {
    pub fn from_json(config_string: &str) -> anyhow::Result<Self> {
        match serde_json::from_str(config_string) {
            Ok(data) => Ok(data),
            Err(_) => UserData::merge_config(config_string),
        }
    }

    /// 旧版本文件缺少的字段用默认值补全
    fn merge_config(config_string: &str) -> anyhow::Result<Self> {
        let mut json_value: serde_json::Value =
            serde_json::from_str(config_string).context("用户数据文件不是合法的 JSON")?;
        let serde_json::Value::Object(ref mut map) = json_value else {
            anyhow::bail!("用户数据文件顶层必须是对象");
        };
        let serde_json::Value::Object(default_map) = serde_json::to_value(UserData::default())?
        else {
            anyhow::bail!("默认用户数据序列化失败");
        };
        for (key, value) in default_map {
            map.entry(key).or_insert(value);
        }
        serde_json::from_value(json_value).context("用户数据文件格式不正确")
    }

    /// 补全账号的设备信息，合并重复的兑换计划
    pub fn normalize(&mut self) -> bool {
        let mut changed = false;
        let mut renamed = Vec::new();
        for (key, account) in self.accounts.iter_mut() {
            changed |= account.normalize();
            if let Some(uid) = account.bbs_uid() {
                if uid != key {
                    renamed.push((key.clone(), uid.to_string()));
                }
            }
        }
        for (old, new) in renamed {
            if let Some(account) = self.accounts.remove(&old) {
                log::info!("账号 {} 以米游社UID {} 重新保存", old, new);
                self.accounts.insert(new.clone(), account);
                for request in self.plan_requests.iter_mut().filter(|r| r.account == old) {
                    request.account = new.clone();
                }
                for plan in self.exchange_plans.iter_mut().filter(|p| p.account == old) {
                    plan.account = new.clone();
                }
                changed = true;
            }
        }

        let before = self.exchange_plans.len();
        let mut seen = std::collections::HashSet::new();
        self.exchange_plans.retain(|plan| seen.insert(plan.key()));
        changed |= before != self.exchange_plans.len();
        changed
    }

    /// 实际生效的设备信息和 salt
    pub fn device_and_salt(&self) -> (DeviceConfig, SaltConfig) {
        if self.preference.override_device_and_salt {
            log::info!("已开启覆写 device_config 和 salt_config，将使用用户数据文件中的配置");
            return (self.device_config.clone(), self.salt_config.clone());
        }
        if self.device_config != DeviceConfig::default()
            || self.salt_config != SaltConfig::default()
        {
            log::warn!(
                "用户数据文件中的 device_config 或 salt_config 与默认值不同，\
                 但未开启 override_device_and_salt，将使用默认配置"
            );
        }
        (DeviceConfig::default(), SaltConfig::default())
    }

    pub fn contains_plan(&self, key: &PlanKey) -> bool {
        self.exchange_plans.iter().any(|p| &p.key() == key)
    }

    /// 返回 `false` 表示计划已存在
    pub fn add_plan(&mut self, plan: ExchangePlan) -> bool {
        if self.contains_plan(&plan.key()) {
            return false;
        }
        self.exchange_plans.push(plan);
        true
    }

    pub fn remove_plan(&mut self, key: &PlanKey) -> Option<ExchangePlan> {
        let index = self.exchange_plans.iter().position(|p| &p.key() == key)?;
        Some(self.exchange_plans.remove(index))
    }
}

/// 用户数据的持久化存储，每次修改后写回文件
pub struct Store {
    path: PathBuf,
    data: Mutex<UserData>,
}

impl Store {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (mut data, mut dirty) = if path.exists() {
            let config_string = std::fs::read_to_string(&path)
                .with_context(|| format!("读取用户数据文件 {} 失败", path.display()))?;
            (UserData::from_json(&config_string)?, false)
        } else {
            log::info!("用户数据文件 {} 不存在，已创建默认文件", path.display());
            (UserData::default(), true)
        };
        dirty |= data.normalize();
        if dirty {
            write_file(&path, &data)?;
        }
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> UserData {
        self.data.lock().await.clone()
    }

    pub async fn preference(&self) -> Preference {
        self.data.lock().await.preference.clone()
    }

    pub async fn account(&self, uid: &str) -> Option<UserAccount> {
        self.data.lock().await.accounts.get(uid).cloned()
    }

    #[cfg(test)]
    pub async fn contains_plan(&self, key: &PlanKey) -> bool {
        self.data.lock().await.contains_plan(key)
    }

    /// 修改数据并立即保存
    pub async fn update<R>(&self, f: impl FnOnce(&mut UserData) -> R) -> anyhow::Result<R> {
        let mut data = self.data.lock().await;
        let result = f(&mut data);
        write_file(&self.path, &data)?;
        Ok(result)
    }
}

fn write_file(path: &Path, data: &UserData) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let config_string = serde_json::to_string_pretty(data)?;
    std::fs::write(path, config_string)
        .with_context(|| format!("写入用户数据文件 {} 失败", path.display()))?;
    Ok(())
}
