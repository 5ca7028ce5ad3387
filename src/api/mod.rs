pub mod auth;
pub mod headers;
pub mod mall;
pub mod transport;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::sleep;

use crate::config::{DeviceConfig, Preference, SaltConfig};
use crate::error::ApiError;

pub use transport::HttpTransport;

pub const URL_MULTI_TOKEN_BY_LOGIN_TICKET: &str =
    "https://api-takumi.mihoyo.com/auth/api/getMultiTokenByLoginTicket";
pub const URL_STOKEN_V2_BY_V1: &str =
    "https://passport-api.mihoyo.com/account/ma-cn-session/app/getTokenBySToken";
pub const URL_LTOKEN_BY_STOKEN: &str =
    "https://passport-api.mihoyo.com/account/auth/api/getLTokenBySToken";
pub const URL_COOKIE_TOKEN_BY_STOKEN: &str =
    "https://passport-api.mihoyo.com/account/auth/api/getCookieAccountInfoBySToken";
pub const URL_GAME_RECORD: &str =
    "https://api-takumi-record.mihoyo.com/game_record/card/wapi/getGameRecordCard";
pub const URL_GAME_LIST: &str = "https://bbs-api.mihoyo.com/apihub/api/getGameList";
pub const URL_MYB: &str =
    "https://api-takumi.mihoyo.com/common/homutreasure/v1/web/user/point?app_id=1&point_sn=myb";
pub const URL_GOOD_LIST: &str =
    "https://api-takumi.mihoyo.com/mall/v1/web/goods/list?app_id=1&point_sn=myb&page_size=20";
pub const URL_CHECK_GOOD: &str =
    "https://api-takumi.mihoyo.com/mall/v1/web/goods/detail?app_id=1&point_sn=myb";
pub const URL_EXCHANGE: &str = "https://api-takumi.miyoushe.com/mall/v1/web/goods/exchange";
pub const URL_ADDRESS: &str = "https://api-takumi.mihoyo.com/account/address/list";

/// 一次 HTTP 请求
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub cookies: BTreeMap<String, String>,
    pub json: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            cookies: BTreeMap::new(),
            json: None,
        }
    }

    /// 在 `base` 后追加经过编码的查询参数
    pub fn with_query(base: &str, params: &[(&str, &str)]) -> Result<String, ApiError> {
        Url::parse_with_params(base, params)
            .map(String::from)
            .map_err(|e| ApiError::NetworkError(format!("URL {base} 无效: {e}")))
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn headers(mut self, headers: Vec<(&'static str, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn cookies(mut self, cookies: BTreeMap<String, String>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }

    #[cfg(test)]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// HTTP 传输层
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<RawResponse, ApiError>;
}

/// 米游社不同接口返回的外层结构
#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope {
    /// `{"retcode": 0, "message": "OK", "data": {...}}`
    Takumi {
        retcode: i64,
        #[serde(default)]
        message: Option<String>,
    },
    /// webapi.account: `{"code": 200, "data": {"status": 1, "msg": "成功", ...}}`
    Webapi { data: WebapiStatus },
    /// `{"status": 1, "msg": "..."}`
    Legacy {
        status: i64,
        #[serde(default, alias = "message")]
        msg: Option<String>,
    },
}

#[derive(Deserialize)]
struct WebapiStatus {
    status: i64,
    #[serde(default)]
    msg: Option<String>,
}

/// 统一之后的 API 返回
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResult {
    pub retcode: i64,
    pub message: String,
    pub data: Value,
    pub raw: String,
}

impl ApiResult {
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|_| ApiError::incorrect_return(raw))?;
        let envelope =
            Envelope::deserialize(&value).map_err(|_| ApiError::incorrect_return(raw))?;
        let (retcode, message) = match envelope {
            Envelope::Takumi { retcode, message } => (retcode, message),
            Envelope::Webapi { data } => (data.status, data.msg),
            Envelope::Legacy { status, msg } => (status, msg),
        };
        Ok(Self {
            retcode,
            message: message.unwrap_or_default(),
            data: value.get("data").cloned().unwrap_or(Value::Null),
            raw: raw.to_string(),
        })
    }

    pub fn success(&self) -> bool {
        self.retcode == 1 || matches!(self.message.as_str(), "成功" | "OK")
    }

    pub fn login_expired(&self) -> bool {
        matches!(self.retcode, -100 | 10001) || self.message == "登录失效，请重新登录"
    }

    pub fn wrong_captcha(&self) -> bool {
        matches!(self.retcode, -201 | -302)
            || matches!(self.message.as_str(), "验证码错误" | "Captcha not match Err")
    }

    /// Headers 里的 DS 无效
    pub fn invalid_ds(&self) -> bool {
        self.message == "invalid request"
    }

    /// 将登录失效、验证码错误转换为对应的错误
    pub fn check(self) -> Result<Self, ApiError> {
        if self.login_expired() {
            Err(ApiError::LoginExpired)
        } else if self.wrong_captcha() {
            Err(ApiError::IncorrectCaptcha)
        } else {
            Ok(self)
        }
    }

    pub fn ensure_success(self) -> Result<Self, ApiError> {
        let result = self.check()?;
        if result.success() {
            Ok(result)
        } else {
            if result.invalid_ds() {
                log::warn!("请求头 DS 无效，可能需要更新 salt_config 并开启 override_device_and_salt");
            }
            Err(ApiError::incorrect_return(result.raw))
        }
    }

    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            log::debug!("返回数据结构不符: {e}");
            ApiError::incorrect_return(self.raw.clone())
        })
    }
}

/// 带重试的 API 客户端，仅对网络错误重试
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    max_retry_times: u32,
    retry_interval: Duration,
    device: Arc<DeviceConfig>,
    salt: Arc<SaltConfig>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, preference: &Preference) -> anyhow::Result<Self> {
        Ok(Self::with_retry(
            transport,
            preference.max_retry_times,
            preference.retry_delay()?,
        ))
    }

    pub fn with_retry(
        transport: Arc<dyn Transport>,
        max_retry_times: u32,
        retry_interval: Duration,
    ) -> Self {
        Self {
            transport,
            max_retry_times,
            retry_interval,
            device: Arc::new(DeviceConfig::default()),
            salt: Arc::new(SaltConfig::default()),
        }
    }

    /// 替换生成请求头所用的设备信息和 salt
    pub fn with_device_and_salt(mut self, device: DeviceConfig, salt: SaltConfig) -> Self {
        self.device = Arc::new(device);
        self.salt = Arc::new(salt);
        self
    }

    pub fn device(&self) -> &DeviceConfig {
        &self.device
    }

    pub fn salt(&self) -> &SaltConfig {
        &self.salt
    }

    pub async fn send(&self, request: ApiRequest) -> Result<ApiResult, ApiError> {
        let mut last_error = ApiError::NetworkError("请求未发送".to_string());
        for i in 0..=self.max_retry_times {
            if i > 0 {
                sleep(self.retry_interval).await;
                log::info!("{} 尝试第 {} 次...", request.url, i + 1);
            }
            match self.send_once(request.clone()).await {
                Err(e) if e.is_network() => {
                    log::warn!("{} 请求失败: {e}", request.url);
                    last_error = e;
                }
                other => return other,
            }
        }
        Err(last_error)
    }

    /// 不重试，用于兑换请求
    pub async fn send_once(&self, request: ApiRequest) -> Result<ApiResult, ApiError> {
        let response = self.transport.send(request).await?;
        ApiResult::parse(&response.body)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeTransport, client};
    use super::*;

    #[test]
    fn parses_takumi_envelope() {
        let result =
            ApiResult::parse(r#"{"retcode":0,"message":"OK","data":{"points":"42"}}"#).unwrap();
        assert_eq!(result.retcode, 0);
        assert!(result.success());
        assert_eq!(result.data["points"], "42");
    }

    #[test]
    fn parses_webapi_envelope() {
        let result = ApiResult::parse(
            r#"{"code":200,"data":{"status":-302,"msg":"验证码错误","account_info":null}}"#,
        )
        .unwrap();
        assert_eq!(result.retcode, -302);
        assert!(result.wrong_captcha());
        assert_eq!(result.check().unwrap_err(), ApiError::IncorrectCaptcha);
    }

    #[test]
    fn parses_legacy_envelope() {
        let result = ApiResult::parse(r#"{"status":1,"msg":"成功"}"#).unwrap();
        assert!(result.success());
        assert_eq!(result.data, Value::Null);
    }

    #[test]
    fn unknown_shape_is_incorrect_return() {
        let err = ApiResult::parse(r#"{"hello":"world"}"#).unwrap_err();
        assert_eq!(err.raw_body(), Some(r#"{"hello":"world"}"#));
        assert!(matches!(
            ApiResult::parse("<html>").unwrap_err(),
            ApiError::IncorrectReturn { .. }
        ));
    }

    #[test]
    fn login_expired_is_classified() {
        let result = ApiResult::parse(r#"{"retcode":-100,"message":"登录失效，请重新登录"}"#).unwrap();
        assert_eq!(result.ensure_success().unwrap_err(), ApiError::LoginExpired);
    }

    #[test]
    fn unsuccessful_result_carries_raw_body() {
        let raw = r#"{"retcode":-1,"message":"invalid request"}"#;
        let err = ApiResult::parse(raw).unwrap().ensure_success().unwrap_err();
        assert_eq!(err.raw_body(), Some(raw));
    }

    #[tokio::test]
    async fn network_errors_are_retried_up_to_limit() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_error(ApiError::NetworkError("reset".into()));
        transport.push_error(ApiError::NetworkError("reset".into()));
        transport.push_body(r#"{"retcode":0,"message":"OK","data":null}"#);
        let api = client(transport.clone());

        let result = api.send(ApiRequest::get("https://example.com")).await.unwrap();
        assert!(result.success());
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let transport = Arc::new(FakeTransport::new());
        let api = client(transport.clone());
        let err = api.send(ApiRequest::get("https://example.com")).await.unwrap_err();
        assert!(err.is_network());
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn incorrect_return_is_not_retried() {
        let transport = Arc::new(FakeTransport::always("oops"));
        let api = client(transport.clone());
        let err = api.send(ApiRequest::get("https://example.com")).await.unwrap_err();
        assert!(matches!(err, ApiError::IncorrectReturn { .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn query_values_are_encoded() {
        let url = ApiRequest::with_query(URL_CHECK_GOOD, &[("goods_id", "a&b c")]).unwrap();
        assert_eq!(
            url,
            "https://api-takumi.mihoyo.com/mall/v1/web/goods/detail?app_id=1&point_sn=myb&goods_id=a%26b+c"
        );
    }

    #[test]
    fn header_lookup_ignores_case() {
        let request = ApiRequest::get("u").headers(vec![("DS", "a".to_string())]);
        assert_eq!(request.header_value("ds"), Some("a"));
        assert_eq!(request.header_value("x-rpc-device_id"), None);
    }
}
