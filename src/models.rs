use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ApiGeneration;
use crate::error::Precondition;
use crate::utils;

static COOKIE_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^=;\s]+)=([^;]*)").expect("valid cookie regex"));

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// 米游社凭证（Cookies）
///
/// 登录时为空，由凭证获取链逐步补全；任何一步失败都会保留已经获得的字段。
/// 米游社UID 在不同接口中以 `stuid`/`ltuid`/`account_id`/`login_uid` 出现，
/// 读取时取第一个非空值，写入时全部同步。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialBundle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ltuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_ticket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stoken_v1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stoken_v2: Option<String>,
    /// 与 stoken_v2 配对使用
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ltoken: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_token: Option<String>,
}

/// 凭证获取链中单步返回的部分字段
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BundleUpdate {
    pub bbs_uid: Option<String>,
    pub stoken_v1: Option<String>,
    pub stoken_v2: Option<String>,
    pub mid: Option<String>,
    pub ltoken: Option<String>,
    pub cookie_token: Option<String>,
}

impl CredentialBundle {
    /// 解析浏览器中复制的 Cookie 字符串
    pub fn from_cookie_str(cookie: &str) -> Self {
        let mut bundle = CredentialBundle::default();
        for cap in COOKIE_PAIR.captures_iter(cookie) {
            let value = cap[2].trim().to_string();
            if value.is_empty() {
                continue;
            }
            match &cap[1] {
                "stuid" | "ltuid" | "account_id" | "login_uid" | "ltuid_v2" | "account_id_v2" => {
                    bundle.set_bbs_uid(&value)
                }
                "login_ticket" => bundle.login_ticket = Some(value),
                "stoken" => bundle.set_stoken(&value),
                "mid" | "ltmid_v2" => bundle.mid = Some(value),
                "ltoken" | "ltoken_v2" => bundle.ltoken = Some(value),
                "cookie_token" | "cookie_token_v2" => bundle.cookie_token = Some(value),
                _ => {}
            }
        }
        bundle
    }

    pub fn bbs_uid(&self) -> Option<&str> {
        [&self.stuid, &self.ltuid, &self.account_id, &self.login_uid]
            .into_iter()
            .find_map(present)
    }

    pub fn set_bbs_uid(&mut self, uid: &str) {
        let uid = Some(uid.to_string());
        self.stuid = uid.clone();
        self.ltuid = uid.clone();
        self.account_id = uid.clone();
        self.login_uid = uid;
    }

    pub fn login_ticket(&self) -> Option<&str> {
        present(&self.login_ticket)
    }

    pub fn stoken_v1(&self) -> Option<&str> {
        present(&self.stoken_v1)
    }

    pub fn stoken_v2(&self) -> Option<&str> {
        present(&self.stoken_v2)
    }

    pub fn mid(&self) -> Option<&str> {
        present(&self.mid)
    }

    pub fn ltoken(&self) -> Option<&str> {
        present(&self.ltoken)
    }

    pub fn cookie_token(&self) -> Option<&str> {
        present(&self.cookie_token)
    }

    /// 优先返回 stoken_v1
    pub fn stoken(&self) -> Option<&str> {
        self.stoken_v1().or_else(|| self.stoken_v2())
    }

    /// 按前缀区分 stoken 版本
    pub fn set_stoken(&mut self, value: &str) {
        if value.starts_with("v2_") {
            self.stoken_v2 = Some(value.to_string());
        } else {
            self.stoken_v1 = Some(value.to_string());
        }
    }

    pub fn apply(&mut self, update: BundleUpdate) {
        if let Some(uid) = update.bbs_uid {
            self.set_bbs_uid(&uid);
        }
        if update.stoken_v1.is_some() {
            self.stoken_v1 = update.stoken_v1;
        }
        if update.stoken_v2.is_some() {
            self.stoken_v2 = update.stoken_v2;
        }
        if update.mid.is_some() {
            self.mid = update.mid;
        }
        if update.ltoken.is_some() {
            self.ltoken = update.ltoken;
        }
        if update.cookie_token.is_some() {
            self.cookie_token = update.cookie_token;
        }
    }

    /// 生成请求所用的 Cookie 字典，空字段不包含在内
    pub fn cookie_map(&self, v2_stoken: bool) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        if let Some(uid) = self.bbs_uid() {
            for key in ["stuid", "ltuid", "account_id", "login_uid"] {
                map.insert(key.to_string(), uid.to_string());
            }
        }
        let stoken = if v2_stoken {
            self.stoken_v2()
        } else {
            self.stoken()
        };
        let fields = [
            ("stoken", stoken),
            ("login_ticket", self.login_ticket()),
            ("mid", self.mid()),
            ("ltoken", self.ltoken()),
            ("cookie_token", self.cookie_token()),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                map.insert(key.to_string(), value.to_string());
            }
        }
        map
    }

    /// 按 API 版本检查兑换所需的最小凭证
    pub fn missing_for_exchange(
        &self,
        generation: ApiGeneration,
        is_virtual: bool,
    ) -> Option<Precondition> {
        if self.bbs_uid().is_none() {
            return Some(Precondition::MissingBbsUid);
        }
        if self.cookie_token().is_none() {
            return Some(Precondition::MissingCookieToken);
        }
        if !is_virtual {
            return None;
        }
        match generation {
            ApiGeneration::V1 if self.stoken().is_none() => Some(Precondition::MissingStoken),
            ApiGeneration::V1 => None,
            ApiGeneration::V2 => {
                if self.stoken().is_none() {
                    Some(Precondition::MissingStoken)
                } else if self.stoken_v1().is_none() && self.mid().is_none() {
                    Some(Precondition::MissingMid)
                } else {
                    None
                }
            }
        }
    }
}

/// 米游社账户数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserAccount {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub cookies: CredentialBundle,
    /// 直接填写的 Cookie 字符串，加载后并入 `cookies`
    #[serde(skip_serializing)]
    pub cookie_string: Option<String>,
    pub device_id_ios: String,
    pub device_id_android: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_fp: Option<String>,
}

impl UserAccount {
    #[cfg(test)]
    pub fn new(cookies: CredentialBundle) -> Self {
        let mut account = UserAccount {
            cookies,
            ..Default::default()
        };
        account.normalize();
        account
    }

    /// 补全设备信息并导入 Cookie 字符串，返回是否有改动
    pub fn normalize(&mut self) -> bool {
        let mut changed = false;
        if self.device_id_ios.is_empty() {
            self.device_id_ios = utils::generate_device_id();
            changed = true;
        }
        if self.device_id_android.is_empty() {
            self.device_id_android = utils::generate_device_id();
            changed = true;
        }
        if self.device_fp.as_deref().is_none_or(str::is_empty) {
            self.device_fp = Some(utils::generate_fp_locally());
            changed = true;
        }
        if let Some(cookie) = self.cookie_string.take() {
            let imported = CredentialBundle::from_cookie_str(&cookie);
            if let Some(uid) = imported.bbs_uid() {
                self.cookies.set_bbs_uid(uid);
            }
            let update = BundleUpdate {
                bbs_uid: None,
                stoken_v1: imported.stoken_v1,
                stoken_v2: imported.stoken_v2,
                mid: imported.mid,
                ltoken: imported.ltoken,
                cookie_token: imported.cookie_token,
            };
            self.cookies.apply(update);
            if imported.login_ticket.is_some() {
                self.cookies.login_ticket = imported.login_ticket;
            }
            changed = true;
        }
        changed
    }

    pub fn bbs_uid(&self) -> Option<&str> {
        self.cookies.bbs_uid()
    }
}

/// 商品数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Good {
    pub goods_id: String,
    pub name: String,
    pub price: i64,
    pub icon: String,
    /// 为 1 时商品只有在指定时间开放兑换；为 2 时为游戏内物品
    #[serde(rename = "type")]
    pub kind: i32,
    pub next_time: Option<i64>,
    pub status: Option<String>,
    pub sale_start_time: Option<String>,
    pub time_by_detail: Option<i64>,
    pub next_num: Option<i64>,
    pub unlimit: Option<bool>,
    pub account_exchange_num: i64,
    pub account_cycle_limit: i64,
    pub account_cycle_type: String,
    pub game_biz: Option<String>,
    pub game: Option<String>,
}

impl Good {
    /// 开放兑换时间，`None` 表示没有计划时间（任何时间均可兑换或兑换已结束）
    pub fn open_time(&self) -> Option<i64> {
        if self.kind != 1 && self.next_time.unwrap_or(0) == 0 {
            return None;
        }
        let time = if self.status.as_deref() == Some("not_in_sell") {
            self.sale_start_time
                .as_deref()
                .and_then(|s| s.trim().parse::<i64>().ok())
                .or(self.time_by_detail)
        } else {
            self.next_time
        };
        time.filter(|t| *t > 0)
    }

    /// 库存，`None` 表示不限量或未知
    pub fn stock(&self) -> Option<i64> {
        if self.unlimit == Some(true) || (self.kind != 1 && self.next_num.unwrap_or(0) == 0) {
            None
        } else {
            self.next_num
        }
    }

    pub fn is_virtual(&self) -> bool {
        self.kind == 2
    }

    /// (已经兑换次数, 最多可兑换次数, 限购类型)
    pub fn limit(&self) -> (i64, i64, &str) {
        (
            self.account_exchange_num,
            self.account_cycle_limit,
            &self.account_cycle_type,
        )
    }

    pub fn time_text(&self, tz: Tz) -> String {
        match self.open_time() {
            Some(t) => utils::format_timestamp(t, tz),
            None => "任何时间".to_string(),
        }
    }
}

impl fmt::Display for Good {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.goods_id)
    }
}

/// 收货地址
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Address {
    pub id: String,
    pub connect_name: String,
    pub connect_areacode: String,
    pub connect_mobile: String,
    pub province_name: String,
    pub city_name: String,
    pub county_name: String,
    pub addr_ext: String,
}

/// 用户绑定的游戏账号
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameRecord {
    pub game_id: i64,
    pub game_role_id: String,
    pub nickname: String,
    pub region: String,
    pub region_name: String,
    pub level: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameInfo {
    pub id: i64,
    /// 例如 hk4e
    pub op_name: String,
    pub en_name: String,
    pub name: String,
}

/// 兑换计划
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePlan {
    pub good: Good,
    /// 所属账号的米游社UID
    pub account: String,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub game_record: Option<GameRecord>,
}

impl ExchangePlan {
    pub fn key(&self) -> PlanKey {
        PlanKey {
            goods_id: self.good.goods_id.clone(),
            open_time: self.good.open_time(),
            address_id: self.address.as_ref().map(|a| a.id.clone()),
            account: self.account.clone(),
            game_role_id: self.game_record.as_ref().map(|r| r.game_role_id.clone()),
        }
    }
}

/// 兑换计划的唯一标识，用于去重以及在调度器回调中找回计划
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlanKey {
    pub goods_id: String,
    pub open_time: Option<i64>,
    pub address_id: Option<String>,
    pub account: String,
    pub game_role_id: Option<String>,
}

impl fmt::Display for PlanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "用户 {} - 商品 {} @ {}",
            self.account,
            self.goods_id,
            self.open_time.unwrap_or(0)
        )
    }
}

/// 配置文件中待解析的兑换请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub goods_id: String,
    pub account: String,
    #[serde(default)]
    pub address_id: Option<String>,
    #[serde(default)]
    pub game_uid: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduled_good(next_time: i64) -> Good {
        Good {
            goods_id: "G1".into(),
            name: "周边".into(),
            kind: 1,
            next_time: Some(next_time),
            next_num: Some(10),
            ..Default::default()
        }
    }

    #[test]
    fn bbs_uid_picks_first_non_empty_alias() {
        let bundle = CredentialBundle {
            stuid: Some(String::new()),
            ltuid: Some("123".into()),
            ..Default::default()
        };
        assert_eq!(bundle.bbs_uid(), Some("123"));
        assert_eq!(CredentialBundle::default().bbs_uid(), None);
    }

    #[test]
    fn stoken_is_routed_by_prefix() {
        let mut bundle = CredentialBundle::default();
        bundle.set_stoken("abcd1234");
        bundle.set_stoken("v2_abcd1234==");
        assert_eq!(bundle.stoken_v1(), Some("abcd1234"));
        assert_eq!(bundle.stoken_v2(), Some("v2_abcd1234=="));
        assert_eq!(bundle.stoken(), Some("abcd1234"));
        assert_eq!(bundle.cookie_map(true)["stoken"], "v2_abcd1234==");
    }

    #[test]
    fn cookie_string_is_parsed() {
        let bundle = CredentialBundle::from_cookie_str(
            "ltuid=42; stoken=v2_xyz==; mid=m1; cookie_token=ct; empty=",
        );
        assert_eq!(bundle.bbs_uid(), Some("42"));
        assert_eq!(bundle.stuid.as_deref(), Some("42"));
        assert_eq!(bundle.stoken_v2(), Some("v2_xyz=="));
        assert_eq!(bundle.mid(), Some("m1"));
        assert_eq!(bundle.cookie_token(), Some("ct"));
    }

    #[test]
    fn cookie_map_skips_empty_fields() {
        let mut bundle = CredentialBundle {
            cookie_token: Some(String::new()),
            ..Default::default()
        };
        bundle.set_bbs_uid("7");
        let map = bundle.cookie_map(false);
        assert_eq!(map.get("account_id").map(String::as_str), Some("7"));
        assert!(!map.contains_key("cookie_token"));
        assert!(!map.contains_key("stoken"));
    }

    #[test]
    fn apply_merges_only_present_fields() {
        let mut bundle = CredentialBundle {
            ltoken: Some("old".into()),
            stoken_v1: Some("s1".into()),
            ..Default::default()
        };
        bundle.apply(BundleUpdate {
            stoken_v2: Some("v2_s".into()),
            mid: Some("m".into()),
            ..Default::default()
        });
        assert_eq!(bundle.ltoken(), Some("old"));
        assert_eq!(bundle.stoken_v1(), Some("s1"));
        assert_eq!(bundle.stoken_v2(), Some("v2_s"));
        assert_eq!(bundle.mid(), Some("m"));
    }

    #[test]
    fn exchange_requirements_depend_on_generation() {
        let mut bundle = CredentialBundle::default();
        assert_eq!(
            bundle.missing_for_exchange(ApiGeneration::V2, false),
            Some(Precondition::MissingBbsUid)
        );
        bundle.set_bbs_uid("1");
        bundle.cookie_token = Some("ct".into());
        assert_eq!(bundle.missing_for_exchange(ApiGeneration::V2, false), None);
        assert_eq!(
            bundle.missing_for_exchange(ApiGeneration::V1, true),
            Some(Precondition::MissingStoken)
        );
        bundle.stoken_v2 = Some("v2_x".into());
        assert_eq!(bundle.missing_for_exchange(ApiGeneration::V1, true), None);
        assert_eq!(
            bundle.missing_for_exchange(ApiGeneration::V2, true),
            Some(Precondition::MissingMid)
        );
        bundle.mid = Some("m".into());
        assert_eq!(bundle.missing_for_exchange(ApiGeneration::V2, true), None);
    }

    #[test]
    fn account_normalize_fills_devices_and_imports_cookie() {
        let mut account = UserAccount {
            cookie_string: Some("stuid=9; stoken=abc".into()),
            ..Default::default()
        };
        assert!(account.normalize());
        assert_eq!(account.device_id_ios.len(), 36);
        assert_eq!(account.bbs_uid(), Some("9"));
        assert_eq!(account.cookies.stoken_v1(), Some("abc"));
        assert!(account.cookie_string.is_none());
        assert!(!account.normalize());
    }

    #[test]
    fn open_time_zero_means_unscheduled() {
        assert_eq!(scheduled_good(1700000000).open_time(), Some(1700000000));
        assert_eq!(scheduled_good(0).open_time(), None);

        let any_time = Good {
            kind: 0,
            next_time: Some(0),
            ..Default::default()
        };
        assert_eq!(any_time.open_time(), None);
    }

    #[test]
    fn not_in_sell_uses_sale_start_time() {
        let good = Good {
            kind: 1,
            next_time: Some(5),
            status: Some("not_in_sell".into()),
            sale_start_time: Some("1700000100".into()),
            ..Default::default()
        };
        assert_eq!(good.open_time(), Some(1700000100));
    }

    #[test]
    fn stock_and_virtual_flags() {
        let mut good = scheduled_good(1);
        assert_eq!(good.stock(), Some(10));
        good.unlimit = Some(true);
        assert_eq!(good.stock(), None);
        good.kind = 2;
        assert!(good.is_virtual());
    }

    #[test]
    fn good_deserializes_vendor_shape() {
        let good: Good = serde_json::from_str(
            r#"{"goods_id":"2023","name":"原石","price":500,"type":2,"next_time":1700000000,
                "next_num":100,"account_exchange_num":0,"account_cycle_limit":1,
                "account_cycle_type":"month","game_biz":"hk4e_cn","status":"online","unlimit":false}"#,
        )
        .unwrap();
        assert!(good.is_virtual());
        assert_eq!(good.open_time(), Some(1700000000));
        assert_eq!(good.game_biz.as_deref(), Some("hk4e_cn"));
        assert_eq!(good.limit(), (0, 1, "month"));
    }

    #[test]
    fn plan_key_uses_identity_fields() {
        let plan = ExchangePlan {
            good: scheduled_good(1700000000),
            account: "U1".into(),
            address: Some(Address {
                id: "A1".into(),
                ..Default::default()
            }),
            game_record: None,
        };
        let key = plan.key();
        assert_eq!(key.goods_id, "G1");
        assert_eq!(key.open_time, Some(1700000000));
        assert_eq!(key.address_id.as_deref(), Some("A1"));
        assert_eq!(key.account, "U1");
        assert_eq!(key.game_role_id, None);
    }
}
