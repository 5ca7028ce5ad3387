//! 凭证相关接口。每个函数只发出一次请求（网络错误重试除外），
//! 返回需要写回 [`CredentialBundle`] 的字段。

use std::collections::BTreeMap;

use serde::Deserialize;

use super::{ApiClient, ApiRequest, headers};
use super::{
    URL_COOKIE_TOKEN_BY_STOKEN, URL_LTOKEN_BY_STOKEN, URL_MULTI_TOKEN_BY_LOGIN_TICKET,
    URL_STOKEN_V2_BY_V1,
};
use crate::error::{ApiError, Precondition};
use crate::models::{BundleUpdate, CredentialBundle};

#[derive(Deserialize)]
struct MultiTokenData {
    list: Vec<NamedToken>,
}

#[derive(Deserialize)]
struct NamedToken {
    name: String,
    token: String,
}

#[derive(Deserialize)]
struct StokenV2Data {
    token: TokenValue,
    user_info: StokenUserInfo,
}

#[derive(Deserialize)]
struct TokenValue {
    token: String,
}

#[derive(Deserialize)]
struct StokenUserInfo {
    mid: String,
    #[serde(default)]
    aid: Option<String>,
}

#[derive(Deserialize)]
struct LtokenData {
    ltoken: String,
}

#[derive(Deserialize)]
struct CookieTokenData {
    cookie_token: String,
    #[serde(default)]
    uid: Option<String>,
}

/// 通过 login_ticket 获取 stoken 和 ltoken
pub async fn get_multi_token_by_login_ticket(
    api: &ApiClient,
    cookies: &CredentialBundle,
) -> Result<BundleUpdate, ApiError> {
    let login_ticket = cookies
        .login_ticket()
        .ok_or(Precondition::MissingLoginTicket)?;
    let uid = cookies.bbs_uid().ok_or(Precondition::MissingBbsUid)?;

    let url = ApiRequest::with_query(
        URL_MULTI_TOKEN_BY_LOGIN_TICKET,
        &[("login_ticket", login_ticket), ("token_types", "3"), ("uid", uid)],
    )?;
    let result = api
        .send(ApiRequest::get(url).headers(headers::takumi_pc(api.device())))
        .await?
        .ensure_success()?;
    let data: MultiTokenData = result.data_as()?;
    let token = |name: &str| {
        data.list
            .iter()
            .find(|t| t.name == name && !t.token.is_empty())
            .map(|t| t.token.clone())
    };
    let stoken = token("stoken").ok_or_else(|| ApiError::incorrect_return(&result.raw))?;

    let mut update = BundleUpdate {
        ltoken: token("ltoken"),
        ..Default::default()
    };
    if stoken.starts_with("v2_") {
        update.stoken_v2 = Some(stoken);
    } else {
        update.stoken_v1 = Some(stoken);
    }
    Ok(update)
}

/// 通过 stoken_v1 获取 stoken_v2 以及 mid
pub async fn get_stoken_v2_by_v1(
    api: &ApiClient,
    cookies: &CredentialBundle,
    device_id: &str,
) -> Result<BundleUpdate, ApiError> {
    let stoken_v1 = cookies.stoken_v1().ok_or(Precondition::MissingStokenV1)?;

    let mut request_cookies = BTreeMap::new();
    request_cookies.insert("stoken".to_string(), stoken_v1.to_string());
    if let Some(uid) = cookies.bbs_uid() {
        request_cookies.insert("stuid".to_string(), uid.to_string());
    }
    let request = ApiRequest::post(URL_STOKEN_V2_BY_V1)
        .headers(headers::passport_signed(api.device(), api.salt(), device_id))
        .cookies(request_cookies);
    let result = api.send(request).await?.ensure_success()?;
    let data: StokenV2Data = result.data_as()?;
    if data.token.token.is_empty() || data.user_info.mid.is_empty() {
        return Err(ApiError::incorrect_return(result.raw));
    }

    Ok(BundleUpdate {
        bbs_uid: new_uid(cookies, data.user_info.aid),
        stoken_v2: Some(data.token.token),
        mid: Some(data.user_info.mid),
        ..Default::default()
    })
}

/// 通过 stoken_v2 和 mid 获取 ltoken
pub async fn get_ltoken_by_stoken(
    api: &ApiClient,
    cookies: &CredentialBundle,
    device_id: &str,
) -> Result<BundleUpdate, ApiError> {
    require_stoken_v2(cookies)?;

    let request = ApiRequest::get(URL_LTOKEN_BY_STOKEN)
        .headers(headers::passport(api.device(), device_id))
        .cookies(cookies.cookie_map(true));
    let result = api.send(request).await?.ensure_success()?;
    let data: LtokenData = result.data_as()?;
    if data.ltoken.is_empty() {
        return Err(ApiError::incorrect_return(result.raw));
    }

    Ok(BundleUpdate {
        ltoken: Some(data.ltoken),
        ..Default::default()
    })
}

/// 通过 stoken_v2 和 mid 获取 cookie_token
pub async fn get_cookie_token_by_stoken(
    api: &ApiClient,
    cookies: &CredentialBundle,
    device_id: &str,
) -> Result<BundleUpdate, ApiError> {
    require_stoken_v2(cookies)?;

    let request = ApiRequest::get(URL_COOKIE_TOKEN_BY_STOKEN)
        .headers(headers::passport(api.device(), device_id))
        .cookies(cookies.cookie_map(true));
    let result = api.send(request).await?.ensure_success()?;
    let data: CookieTokenData = result.data_as()?;
    if data.cookie_token.is_empty() {
        return Err(ApiError::incorrect_return(result.raw));
    }

    Ok(BundleUpdate {
        bbs_uid: new_uid(cookies, data.uid),
        cookie_token: Some(data.cookie_token),
        ..Default::default()
    })
}

fn require_stoken_v2(cookies: &CredentialBundle) -> Result<(), Precondition> {
    if cookies.stoken_v2().is_none() {
        return Err(Precondition::MissingStokenV2);
    }
    if cookies.mid().is_none() {
        return Err(Precondition::MissingMid);
    }
    Ok(())
}

/// 只有本地还没有米游社UID时才采用服务器返回的值
fn new_uid(cookies: &CredentialBundle, returned: Option<String>) -> Option<String> {
    match cookies.bbs_uid() {
        Some(_) => None,
        None => returned.filter(|uid| !uid.is_empty()),
    }
}
