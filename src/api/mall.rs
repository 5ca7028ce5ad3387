use serde::Deserialize;
use serde_json::json;

use super::{ApiClient, ApiRequest, headers};
use super::{
    URL_ADDRESS, URL_CHECK_GOOD, URL_EXCHANGE, URL_GAME_LIST, URL_GAME_RECORD, URL_GOOD_LIST,
    URL_MYB,
};
use crate::error::{ApiError, Precondition};
use crate::models::{Address, ExchangePlan, GameInfo, GameRecord, Good, UserAccount};
use crate::utils;

#[derive(Deserialize)]
struct ListData<T> {
    list: Vec<T>,
}

#[derive(Deserialize)]
struct PointsData {
    points: serde_json::Value,
}

/// 兑换请求的结果（服务器已正确响应）
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeOutcome {
    Redeemed { raw: String },
    Rejected { message: String, raw: String },
}

/// 获取某商品的详细信息
pub async fn get_good_detail(api: &ApiClient, goods_id: &str) -> Result<Good, ApiError> {
    let url = ApiRequest::with_query(URL_CHECK_GOOD, &[("goods_id", goods_id)])?;
    let result = api.send(ApiRequest::get(url)).await?.check()?;
    if matches!(result.message.as_str(), "商品不存在" | "商品已下架") {
        return Err(ApiError::GoodNotExisted);
    }
    result.data_as()
}

/// 获取商品列表，`game` 为空时获取所有分区
pub async fn get_good_list(api: &ApiClient, game: &str) -> Result<Vec<Good>, ApiError> {
    let mut goods = Vec::new();
    for page in 1.. {
        let page = page.to_string();
        let url =
            ApiRequest::with_query(URL_GOOD_LIST, &[("page", page.as_str()), ("game", game)])?;
        let request = ApiRequest::get(url)
            .headers(headers::user_center(api.device(), &utils::generate_device_id()));
        let result = api.send(request).await?.check()?;
        let data: ListData<Good> = result.data_as()?;
        if data.list.is_empty() {
            break;
        }
        goods.extend(data.list);
    }
    Ok(goods)
}

/// 获取用户的收货地址
pub async fn get_address(api: &ApiClient, account: &UserAccount) -> Result<Vec<Address>, ApiError> {
    let url = format!("{URL_ADDRESS}?t={}", utils::now_millis());
    let request = ApiRequest::get(url)
        .headers(headers::user_center(api.device(), &account.device_id_ios))
        .cookies(account.cookies.cookie_map(true));
    let result = api.send(request).await?.check()?;
    let data: ListData<Address> = result.data_as()?;
    Ok(data.list)
}

/// 获取用户绑定的游戏账号
pub async fn get_game_record(
    api: &ApiClient,
    account: &UserAccount,
) -> Result<Vec<GameRecord>, ApiError> {
    let uid = account.bbs_uid().ok_or(Precondition::MissingBbsUid)?;
    let url = ApiRequest::with_query(URL_GAME_RECORD, &[("uid", uid)])?;
    let request = ApiRequest::get(url)
        .headers(headers::webstatic_mobile(api.device()))
        .cookies(account.cookies.cookie_map(false));
    let result = api.send(request).await?.check()?;
    let data: ListData<GameRecord> = result.data_as()?;
    Ok(data.list)
}

pub async fn get_game_list(api: &ApiClient) -> Result<Vec<GameInfo>, ApiError> {
    let request = ApiRequest::get(URL_GAME_LIST).headers(headers::game_list(
        api.device(),
        api.salt(),
        &utils::generate_device_id(),
    ));
    let result = api.send(request).await?.check()?;
    let data: ListData<GameInfo> = result.data_as()?;
    Ok(data.list)
}

/// 获取用户当前米游币数量
pub async fn get_user_points(api: &ApiClient, account: &UserAccount) -> Result<i64, ApiError> {
    let request = ApiRequest::get(URL_MYB)
        .headers(headers::webstatic_mobile(api.device()))
        .cookies(account.cookies.cookie_map(true));
    let result = api.send(request).await?.check()?;
    let data: PointsData = result.data_as()?;
    let points = match &data.points {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    };
    points.ok_or_else(|| ApiError::incorrect_return(result.raw))
}

/// 执行一次兑换，不做任何重试
pub async fn good_exchange(
    api: &ApiClient,
    plan: &ExchangePlan,
    account: &UserAccount,
) -> Result<ExchangeOutcome, ApiError> {
    let mut content = json!({
        "app_id": 1,
        "point_sn": "myb",
        "goods_id": plan.good.goods_id,
        "exchange_num": 1,
    });
    if plan.good.is_virtual() {
        let record = plan.game_record.as_ref().ok_or(Precondition::MissingGameUid)?;
        let game_biz = plan.good.game_biz.as_deref().ok_or(Precondition::UnsupportedGame)?;
        content["uid"] = json!(record.game_role_id);
        content["region"] = json!(record.region);
        content["game_biz"] = json!(game_biz);
    } else {
        let address = plan.address.as_ref().ok_or(Precondition::MissingAddress)?;
        content["address_id"] = json!(address.id);
    }

    let device_fp = account
        .device_fp
        .clone()
        .unwrap_or_else(utils::generate_fp_locally);
    let request = ApiRequest::post(URL_EXCHANGE)
        .headers(headers::exchange(api.device(), &account.device_id_ios, &device_fp))
        .cookies(account.cookies.cookie_map(false))
        .json(content);
    let result = api.send_once(request).await?;
    if result.login_expired() {
        return Err(ApiError::LoginExpired);
    }
    if result.success() {
        Ok(ExchangeOutcome::Redeemed { raw: result.raw })
    } else {
        Ok(ExchangeOutcome::Rejected {
            message: result.message,
            raw: result.raw,
        })
    }
}
