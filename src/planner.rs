//! 兑换计划的创建与校验

use thiserror::Error;

use crate::api::ApiClient;
use crate::api::mall;
use crate::config::{ApiGeneration, Store};
use crate::error::{ApiError, Precondition};
use crate::models::{Address, ExchangePlan, GameInfo, GameRecord, Good, PlanRequest, UserAccount};

/// 商品本身无法被定时兑换
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Unschedulable {
    #[error("商品没有开放兑换时间（任何时间均可兑换或已结束）")]
    NoOpenTime,
    #[error("商品已售罄")]
    SoldOut,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("{0}")]
    Unschedulable(#[from] Unschedulable),
    #[error("{0}")]
    Precondition(#[from] Precondition),
    #[error("{0}")]
    Api(ApiError),
}

impl From<ApiError> for PlanError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Precondition(p) => PlanError::Precondition(p),
            other => PlanError::Api(other),
        }
    }
}

/// 校验并创建兑换计划
pub fn build_plan(
    good: Good,
    account: &UserAccount,
    address: Option<Address>,
    game_record: Option<GameRecord>,
    generation: ApiGeneration,
) -> Result<ExchangePlan, PlanError> {
    if good.open_time().is_none() {
        return Err(Unschedulable::NoOpenTime.into());
    }
    if good.stock() == Some(0) {
        return Err(Unschedulable::SoldOut.into());
    }

    let (address, game_record) = if good.is_virtual() {
        if good.game_biz.as_deref().is_none_or(str::is_empty) {
            return Err(Precondition::UnsupportedGame.into());
        }
        let record = game_record.ok_or(Precondition::MissingGameUid)?;
        (None, Some(record))
    } else {
        let address = address.ok_or(Precondition::MissingAddress)?;
        (Some(address), None)
    };

    if let Some(missing) = account
        .cookies
        .missing_for_exchange(generation, good.is_virtual())
    {
        return Err(missing.into());
    }
    let uid = account.bbs_uid().ok_or(Precondition::MissingBbsUid)?;

    Ok(ExchangePlan {
        good,
        account: uid.to_string(),
        address,
        game_record,
    })
}

/// 由 game_biz (如 `hk4e_cn`) 找到对应游戏
fn find_game<'a>(games: &'a [GameInfo], game_biz: &str) -> Option<&'a GameInfo> {
    let op_name = game_biz.split('_').next().unwrap_or(game_biz);
    games.iter().find(|g| g.op_name == op_name)
}

fn pick_record(
    records: Vec<GameRecord>,
    game_id: i64,
    game_uid: Option<&str>,
) -> Option<GameRecord> {
    records
        .into_iter()
        .filter(|r| r.game_id == game_id)
        .find(|r| game_uid.is_none_or(|uid| r.game_role_id == uid))
}

/// 未指定地址ID时，仅在只有一个地址时使用它
fn pick_address(addresses: Vec<Address>, address_id: Option<&str>) -> Option<Address> {
    match address_id {
        Some(id) => addresses.into_iter().find(|a| a.id == id),
        None if addresses.len() == 1 => addresses.into_iter().next(),
        None => None,
    }
}

/// 获取商品、地址或游戏账号信息，将配置中的兑换请求转换为兑换计划
pub async fn resolve_request(
    api: &ApiClient,
    store: &Store,
    request: &PlanRequest,
) -> Result<ExchangePlan, PlanError> {
    let account = store
        .account(&request.account)
        .await
        .ok_or(Precondition::AccountNotFound)?;
    let generation = store.preference().await.api_generation;

    let mut good = mall::get_good_detail(api, &request.goods_id).await?;
    if good.goods_id.is_empty() {
        good.goods_id = request.goods_id.clone();
    }

    if good.is_virtual() {
        let game_biz = good.game_biz.clone().unwrap_or_default();
        let games = mall::get_game_list(api).await?;
        let Some(game) = find_game(&games, &game_biz) else {
            return Err(Precondition::UnsupportedGame.into());
        };
        let records = mall::get_game_record(api, &account).await?;
        let record = pick_record(records, game.id, request.game_uid.as_deref());
        if record.is_none() {
            log::warn!("账号 {} 没有找到 {} 对应的游戏账号", request.account, game.name);
        }
        build_plan(good, &account, None, record, generation)
    } else {
        let addresses = mall::get_address(api, &account).await?;
        let address = pick_address(addresses, request.address_id.as_deref());
        build_plan(good, &account, address, None, generation)
    }
}
