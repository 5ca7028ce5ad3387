use thiserror::Error;

/// 在发出网络请求前即可在本地判断出的缺失条件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Precondition {
    #[error("Cookies 缺少 login_ticket")]
    MissingLoginTicket,
    #[error("Cookies 缺少米游社UID (stuid, ltuid, ...)")]
    MissingBbsUid,
    #[error("Cookies 缺少 stoken_v1")]
    MissingStokenV1,
    #[error("Cookies 缺少 stoken_v2")]
    MissingStokenV2,
    #[error("商品为游戏内物品，但 Cookies 缺少 stoken")]
    MissingStoken,
    #[error("stoken 为 v2 类型，但 Cookies 缺少 mid")]
    MissingMid,
    #[error("Cookies 缺少 cookie_token")]
    MissingCookieToken,
    #[error("商品为实体物品，但未配置收货地址")]
    MissingAddress,
    #[error("商品为游戏内物品，但未配置对应游戏的账号UID")]
    MissingGameUid,
    #[error("暂不支持兑换对应分区/游戏的商品")]
    UnsupportedGame,
    #[error("账号不存在")]
    AccountNotFound,
}

/// 米游社 API 调用的错误分类
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("网络请求失败: {0}")]
    NetworkError(String),
    #[error("服务器没有正确返回")]
    IncorrectReturn { body: String },
    #[error("登录失效，请重新登录")]
    LoginExpired,
    #[error("{0}")]
    Precondition(#[from] Precondition),
    #[error("验证码错误")]
    IncorrectCaptcha,
    #[error("商品不存在或已下架")]
    GoodNotExisted,
}

impl ApiError {
    pub fn incorrect_return(body: impl Into<String>) -> Self {
        ApiError::IncorrectReturn { body: body.into() }
    }

    /// 服务器原始返回（如果有）
    pub fn raw_body(&self) -> Option<&str> {
        match self {
            ApiError::IncorrectReturn { body } => Some(body),
            _ => None,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::NetworkError(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::NetworkError(format!("连接超时: {e}"))
        } else {
            ApiError::NetworkError(e.to_string())
        }
    }
}
