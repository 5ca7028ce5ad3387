//! 各接口所需的请求头，模拟米游社客户端
//!
//! 下面的常量是 [`DeviceConfig`] 和 [`SaltConfig`] 的默认值。

use crate::config::{DeviceConfig, SaltConfig};
use crate::utils;

pub const USER_AGENT_MOBILE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 15_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) miHoYoBBS/2.54.1";
pub const USER_AGENT_PC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.0 Safari/605.1.15";
pub const USER_AGENT_OTHER: &str = "Hyperion/275 CFNetwork/1402.0.8 Darwin/22.2.0";

pub const X_RPC_DEVICE_MODEL_MOBILE: &str = "iPhone10,2";
pub const X_RPC_DEVICE_NAME_MOBILE: &str = "iPhone";
pub const X_RPC_SYS_VERSION: &str = "15.4";
pub const X_RPC_CHANNEL: &str = "appstore";
pub const X_RPC_APP_VERSION: &str = "2.54.1";
pub const X_RPC_APP_ID: &str = "bll8iq97cem8";

pub const SALT_IOS: &str = "ulInCDohgEs557j0VsPDYnQaaz6KJcv5";
pub const SALT_PROD: &str = "JwYDpKvLj6MrMqqYU6jTKF17KNO2PXoS";

type Headers = Vec<(&'static str, String)>;

fn headers(pairs: &[(&'static str, &str)]) -> Headers {
    pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
}

pub fn takumi_pc(device: &DeviceConfig) -> Headers {
    headers(&[
        ("Content-Type", "application/json;charset=utf-8"),
        ("Origin", "https://bbs.mihoyo.com"),
        ("Accept", "application/json, text/plain, */*"),
        ("User-Agent", device.user_agent_pc.as_str()),
        ("Referer", "https://bbs.mihoyo.com/"),
        ("Accept-Language", "zh-CN,zh-Hans;q=0.9"),
    ])
}

pub fn passport(device: &DeviceConfig, device_id: &str) -> Headers {
    let mut h = headers(&[
        ("Content-Type", "application/json"),
        ("Accept", "*/*"),
        ("x-rpc-client_type", "1"),
        ("Accept-Language", "zh-CN,zh-Hans;q=0.9"),
        ("x-rpc-game_biz", "bbs_cn"),
        ("x-rpc-device_model", device.x_rpc_device_model_mobile.as_str()),
        ("User-Agent", device.user_agent_other.as_str()),
        ("x-rpc-device_name", device.x_rpc_device_name_mobile.as_str()),
        ("x-rpc-app_version", device.x_rpc_app_version.as_str()),
        ("x-rpc-sdk_version", "1.6.1"),
        ("x-rpc-sys_version", device.x_rpc_sys_version.as_str()),
    ]);
    h.push(("x-rpc-device_id", device_id.to_string()));
    h
}

/// 用 stoken_v1 换取 stoken_v2 时需要额外的 app_id 和 DS
pub fn passport_signed(device: &DeviceConfig, salt: &SaltConfig, device_id: &str) -> Headers {
    let mut h = passport(device, device_id);
    h.push(("x-rpc-aigis", String::new()));
    h.push(("x-rpc-app_id", X_RPC_APP_ID.to_string()));
    h.push(("DS", utils::generate_ds(&salt.salt_prod)));
    h
}

pub fn webstatic_mobile(device: &DeviceConfig) -> Headers {
    headers(&[
        ("Origin", "https://webstatic.mihoyo.com"),
        ("Accept", "application/json, text/plain, */*"),
        ("User-Agent", device.user_agent_mobile.as_str()),
        ("Accept-Language", "zh-CN,zh-Hans;q=0.9"),
        ("Referer", "https://webstatic.mihoyo.com/"),
    ])
}

pub fn user_center(device: &DeviceConfig, device_id: &str) -> Headers {
    let mut h = headers(&[
        ("Accept", "application/json, text/plain, */*"),
        ("Origin", "https://user.mihoyo.com"),
        ("x-rpc-client_type", "5"),
        ("User-Agent", device.user_agent_mobile.as_str()),
        ("Referer", "https://user.mihoyo.com/"),
        ("Accept-Language", "zh-CN,zh-Hans;q=0.9"),
    ]);
    h.push(("x-rpc-device_id", device_id.to_string()));
    h
}

pub fn game_list(device: &DeviceConfig, salt: &SaltConfig, device_id: &str) -> Headers {
    let mut h = headers(&[
        ("Accept", "*/*"),
        ("x-rpc-client_type", "1"),
        ("x-rpc-channel", device.x_rpc_channel.as_str()),
        ("Accept-Language", "zh-CN,zh-Hans;q=0.9"),
        ("x-rpc-sys_version", device.x_rpc_sys_version.as_str()),
        ("Referer", "https://app.mihoyo.com"),
        ("x-rpc-device_name", device.x_rpc_device_name_mobile.as_str()),
        ("x-rpc-app_version", device.x_rpc_app_version.as_str()),
        ("User-Agent", device.user_agent_other.as_str()),
        ("x-rpc-device_model", device.x_rpc_device_model_mobile.as_str()),
    ]);
    h.push(("x-rpc-device_id", device_id.to_string()));
    h.push(("DS", utils::generate_ds(&salt.salt_ios)));
    h
}

pub fn exchange(device: &DeviceConfig, device_id: &str, device_fp: &str) -> Headers {
    let mut h = headers(&[
        ("Accept", "application/json, text/plain, */*"),
        ("Accept-Language", "zh-CN,zh-Hans;q=0.9"),
        ("Content-Type", "application/json"),
        ("Origin", "https://webstatic.miyoushe.com"),
        ("Referer", "https://webstatic.miyoushe.com/"),
        ("User-Agent", device.user_agent_mobile.as_str()),
        ("x-rpc-app_version", device.x_rpc_app_version.as_str()),
        ("x-rpc-channel", device.x_rpc_channel.as_str()),
        ("x-rpc-client_type", "1"),
        ("x-rpc-verify_key", X_RPC_APP_ID),
        ("x-rpc-device_model", device.x_rpc_device_model_mobile.as_str()),
        ("x-rpc-device_name", device.x_rpc_device_name_mobile.as_str()),
        ("x-rpc-sys_version", device.x_rpc_sys_version.as_str()),
    ]);
    h.push(("x-rpc-device_id", device_id.to_string()));
    h.push(("x-rpc-device_fp", device_fp.to_string()));
    h
}
