//! 凭证获取链
//!
//! 从 login_ticket 或已有的 stoken 出发，按固定顺序调用接口补全 Cookies。
//! 每一步成功后立即合并到凭证中，失败时停止，已获得的字段保留。

use std::fmt;

use crate::api::ApiClient;
use crate::api::auth;
use crate::error::ApiError;
use crate::models::CredentialBundle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainStep {
    StokenByLoginTicket,
    StokenV2ByV1,
    LtokenByStoken,
    CookieTokenByStoken,
}

impl ChainStep {
    pub const ALL: [ChainStep; 4] = [
        ChainStep::StokenByLoginTicket,
        ChainStep::StokenV2ByV1,
        ChainStep::LtokenByStoken,
        ChainStep::CookieTokenByStoken,
    ];

    /// 该步骤的产出是否已经存在，存在时可跳过
    fn satisfied(self, cookies: &CredentialBundle) -> bool {
        match self {
            ChainStep::StokenByLoginTicket => cookies.stoken().is_some(),
            ChainStep::StokenV2ByV1 => cookies.stoken_v2().is_some() && cookies.mid().is_some(),
            // ltoken 和 cookie_token 每次都刷新
            ChainStep::LtokenByStoken | ChainStep::CookieTokenByStoken => false,
        }
    }
}

impl fmt::Display for ChainStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChainStep::StokenByLoginTicket => "通过 login_ticket 获取 stoken",
            ChainStep::StokenV2ByV1 => "通过 stoken_v1 获取 stoken_v2",
            ChainStep::LtokenByStoken => "通过 stoken 获取 ltoken",
            ChainStep::CookieTokenByStoken => "通过 stoken 获取 cookie_token",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
pub struct ChainReport {
    pub completed: Vec<ChainStep>,
    pub skipped: Vec<ChainStep>,
    pub failed: Option<(ChainStep, ApiError)>,
}

/// 依次执行凭证获取链，`full_refresh` 为 `true` 时不跳过任何步骤
pub async fn derive_credentials(
    api: &ApiClient,
    cookies: &mut CredentialBundle,
    device_id: &str,
    full_refresh: bool,
) -> ChainReport {
    let mut report = ChainReport::default();
    for step in ChainStep::ALL {
        if !full_refresh && step.satisfied(cookies) {
            log::debug!("{step}: 已有对应凭证，跳过");
            report.skipped.push(step);
            continue;
        }
        let result = match step {
            ChainStep::StokenByLoginTicket => {
                auth::get_multi_token_by_login_ticket(api, cookies).await
            }
            ChainStep::StokenV2ByV1 => auth::get_stoken_v2_by_v1(api, cookies, device_id).await,
            ChainStep::LtokenByStoken => auth::get_ltoken_by_stoken(api, cookies, device_id).await,
            ChainStep::CookieTokenByStoken => {
                auth::get_cookie_token_by_stoken(api, cookies, device_id).await
            }
        };
        match result {
            Ok(update) => {
                cookies.apply(update);
                report.completed.push(step);
            }
            Err(e) => {
                log::error!("{step} 失败: {e}");
                if let Some(body) = e.raw_body() {
                    log::debug!("服务器返回: {body}");
                }
                report.failed = Some((step, e));
                break;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::api::testing::{FakeTransport, client};
    use crate::error::Precondition;

    const MULTI_TOKEN: &str = r#"{"retcode":0,"message":"OK","data":{"list":[
        {"name":"stoken","token":"s1"},{"name":"ltoken","token":"l0"}]}}"#;
    const STOKEN_V2: &str = r#"{"retcode":0,"message":"OK","data":{"token":{"token":"v2_s"},
        "user_info":{"aid":"100","mid":"m1"}}}"#;
    const LTOKEN: &str = r#"{"retcode":0,"message":"OK","data":{"ltoken":"l1"}}"#;
    const COOKIE_TOKEN: &str = r#"{"retcode":0,"message":"OK","data":{"uid":"100","cookie_token":"ct"}}"#;

    fn ticket_bundle() -> CredentialBundle {
        let mut cookies = CredentialBundle {
            login_ticket: Some("ticket".into()),
            ..Default::default()
        };
        cookies.set_bbs_uid("100");
        cookies
    }

    #[tokio::test]
    async fn full_chain_from_login_ticket() {
        let transport = Arc::new(FakeTransport::new());
        for body in [MULTI_TOKEN, STOKEN_V2, LTOKEN, COOKIE_TOKEN] {
            transport.push_body(body);
        }
        let mut cookies = ticket_bundle();

        let report = derive_credentials(&client(transport.clone()), &mut cookies, "DEV", false).await;
        assert!(report.failed.is_none());
        assert_eq!(report.completed, ChainStep::ALL.to_vec());
        assert_eq!(cookies.stoken_v1(), Some("s1"));
        assert_eq!(cookies.stoken_v2(), Some("v2_s"));
        assert_eq!(cookies.mid(), Some("m1"));
        assert_eq!(cookies.ltoken(), Some("l1"));
        assert_eq!(cookies.cookie_token(), Some("ct"));
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test]
    async fn existing_tokens_skip_early_steps() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_body(LTOKEN);
        transport.push_body(COOKIE_TOKEN);
        let mut cookies = CredentialBundle {
            stoken_v2: Some("v2_s".into()),
            mid: Some("m1".into()),
            ..Default::default()
        };

        let report = derive_credentials(&client(transport.clone()), &mut cookies, "DEV", false).await;
        assert!(report.failed.is_none());
        assert_eq!(
            report.skipped,
            vec![ChainStep::StokenByLoginTicket, ChainStep::StokenV2ByV1]
        );
        assert_eq!(cookies.bbs_uid(), Some("100"));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn stops_at_first_failure_and_keeps_progress() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_body(MULTI_TOKEN);
        transport.push_body(r#"{"retcode":-100,"message":"登录失效，请重新登录","data":null}"#);
        let mut cookies = ticket_bundle();

        let report = derive_credentials(&client(transport.clone()), &mut cookies, "DEV", false).await;
        assert_eq!(report.completed, vec![ChainStep::StokenByLoginTicket]);
        assert_eq!(
            report.failed,
            Some((ChainStep::StokenV2ByV1, ApiError::LoginExpired))
        );
        assert_eq!(cookies.stoken_v1(), Some("s1"));
        assert_eq!(cookies.cookie_token(), None);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn empty_login_ticket_fails_locally() {
        let transport = Arc::new(FakeTransport::always("{}"));
        let mut cookies = ticket_bundle();
        cookies.login_ticket = Some(String::new());

        let report = derive_credentials(&client(transport.clone()), &mut cookies, "DEV", false).await;
        assert_eq!(
            report.failed,
            Some((
                ChainStep::StokenByLoginTicket,
                ApiError::Precondition(Precondition::MissingLoginTicket)
            ))
        );
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn full_refresh_runs_every_step() {
        let transport = Arc::new(FakeTransport::new());
        for body in [MULTI_TOKEN, STOKEN_V2, LTOKEN, COOKIE_TOKEN] {
            transport.push_body(body);
        }
        let mut cookies = ticket_bundle();
        cookies.stoken_v2 = Some("v2_old".into());
        cookies.mid = Some("m0".into());

        let report = derive_credentials(&client(transport.clone()), &mut cookies, "DEV", true).await;
        assert!(report.skipped.is_empty());
        assert_eq!(cookies.stoken_v2(), Some("v2_s"));
        assert_eq!(transport.calls(), 4);
    }
}
