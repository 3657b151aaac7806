//! 凭据校验：共享密钥（`X-Password` 头）与 Basic 认证两种策略。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Json};
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header};
use axum::middleware;
use axum::response::{Html, IntoResponse, Json as JsonResponse, Response};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Basic};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use subtle::{Choice, ConstantTimeEq};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{BASIC_AUTH_REALM, BASIC_AUTH_USER, PASSWORD_HEADER};
use crate::error::ApiError;
use crate::http::prefers_html;
use crate::page::render_login;

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthMode {
    /// Shared secret in the `X-Password` header.
    #[default]
    Header,
    /// HTTP basic auth with a fixed username.
    Basic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    Deny,
}

impl From<Choice> for AuthDecision {
    fn from(choice: Choice) -> Self {
        if bool::from(choice) {
            AuthDecision::Allow
        } else {
            AuthDecision::Deny
        }
    }
}

/// 请求携带的凭据。
#[derive(Clone, Copy, Debug)]
pub enum Credential<'a> {
    Missing,
    Secret(&'a str),
    Basic { username: &'a str, password: &'a str },
}

/// 加盐 SHA-256 摘要，明文密码不落地。
#[derive(Clone)]
pub struct PasswordHash {
    salt: [u8; 16],
    digest: [u8; 32],
}

impl PasswordHash {
    pub fn new(password: &str) -> Self {
        let salt = *Uuid::new_v4().as_bytes();
        let digest = salted_digest(&salt, password);
        Self { salt, digest }
    }

    fn matches(&self, password: &str) -> Choice {
        salted_digest(&self.salt, password)
            .as_slice()
            .ct_eq(self.digest.as_slice())
    }
}

impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordHash(..)")
    }
}

fn salted_digest(salt: &[u8], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

#[derive(Clone)]
pub enum CredentialGate {
    /// 未配置密码，所有请求放行。
    Open,
    /// 比较摘要而不是原文，长度不同也不会提前返回。
    SharedSecret(PasswordHash),
    Basic(PasswordHash),
}

impl CredentialGate {
    /// 空密码视为未配置。
    pub fn new(mode: AuthMode, password: Option<String>) -> Self {
        let Some(password) = password.filter(|value| !value.is_empty()) else {
            return CredentialGate::Open;
        };
        match mode {
            AuthMode::Header => CredentialGate::SharedSecret(PasswordHash::new(&password)),
            AuthMode::Basic => CredentialGate::Basic(PasswordHash::new(&password)),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, CredentialGate::Open)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            CredentialGate::Open => "open",
            CredentialGate::SharedSecret(_) => "shared-secret header",
            CredentialGate::Basic(_) => "basic auth",
        }
    }

    /// 判断请求凭据是否有效。拒绝时不区分用户名错误还是密码错误。
    pub fn authorize(&self, credential: Credential<'_>) -> AuthDecision {
        match (self, credential) {
            (CredentialGate::Open, _) => AuthDecision::Allow,
            (_, Credential::Missing) => AuthDecision::Deny,
            (CredentialGate::SharedSecret(hash), Credential::Secret(supplied)) => {
                hash.matches(supplied).into()
            }
            (CredentialGate::Basic(hash), Credential::Basic { username, password }) => {
                let user_ok = username.as_bytes().ct_eq(BASIC_AUTH_USER.as_bytes());
                (user_ok & hash.matches(password)).into()
            }
            _ => AuthDecision::Deny,
        }
    }

    /// 仅校验密码部分（预检接口使用）。
    pub fn verify_password(&self, password: &str) -> AuthDecision {
        let credential = match self {
            CredentialGate::Basic(_) => Credential::Basic {
                username: BASIC_AUTH_USER,
                password,
            },
            _ => Credential::Secret(password),
        };
        self.authorize(credential)
    }

    /// Basic 模式下解析 `Authorization` 头；其他模式或无法解析时返回 `None`。
    pub fn decode_basic(&self, headers: &HeaderMap) -> Option<Authorization<Basic>> {
        match self {
            CredentialGate::Basic(_) => headers.typed_get::<Authorization<Basic>>(),
            _ => None,
        }
    }

    /// 从请求头中取出当前策略需要的凭据。
    pub fn credential_from<'a>(
        &self,
        headers: &'a HeaderMap,
        basic: Option<&'a Authorization<Basic>>,
    ) -> Credential<'a> {
        match self {
            CredentialGate::Open => Credential::Missing,
            CredentialGate::SharedSecret(_) => headers
                .get(PASSWORD_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(Credential::Secret)
                .unwrap_or(Credential::Missing),
            CredentialGate::Basic(_) => basic
                .map(|auth| Credential::Basic {
                    username: auth.username(),
                    password: auth.password(),
                })
                .unwrap_or(Credential::Missing),
        }
    }

    /// 401 响应附带的挑战头。
    pub fn challenge_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if matches!(self, CredentialGate::Basic(_)) {
            headers.insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(BASIC_AUTH_REALM),
            );
        }
        headers
    }
}

impl fmt::Debug for CredentialGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialGate::Open => f.write_str("Open"),
            CredentialGate::SharedSecret(_) => f.write_str("SharedSecret(..)"),
            CredentialGate::Basic(hash) => f.debug_tuple("Basic").field(hash).finish(),
        }
    }
}

/// 认证中间件：除预检接口外，每个请求都必须携带凭据。
pub async fn auth_middleware(
    Extension(gate): Extension<Arc<CredentialGate>>,
    req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, ApiError> {
    let path = req.uri().path();
    if is_auth_exempt_path(path) {
        return Ok(next.run(req).await);
    }

    let basic = gate.decode_basic(req.headers());
    let credential = gate.credential_from(req.headers(), basic.as_ref());
    match gate.authorize(credential) {
        AuthDecision::Allow => Ok(next.run(req).await),
        AuthDecision::Deny => {
            warn!(path, method = %req.method(), "request denied");
            if wants_login_page(&gate, &req) {
                return Ok((StatusCode::UNAUTHORIZED, Html(render_login())).into_response());
            }
            Err(ApiError::Unauthorized(gate.challenge_headers()))
        }
    }
}

fn is_auth_exempt_path(path: &str) -> bool {
    path == "/verify-password"
}

/// 浏览器直接打开首页时给出输入密码的页面（Basic 模式由浏览器自行弹窗）。
fn wants_login_page(gate: &CredentialGate, req: &Request<AxumBody>) -> bool {
    matches!(gate, CredentialGate::SharedSecret(_))
        && req.method() == Method::GET
        && req.uri().path() == "/"
        && prefers_html(req.headers())
}

#[derive(Deserialize)]
pub(crate) struct VerifyPasswordRequest {
    #[serde(default)]
    password: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub(crate) struct VerifyPasswordResponse {
    status: String,
}

/// 密码预检：只返回是否通过。
pub async fn verify_password(
    Extension(gate): Extension<Arc<CredentialGate>>,
    Json(payload): Json<VerifyPasswordRequest>,
) -> (StatusCode, JsonResponse<VerifyPasswordResponse>) {
    match gate.verify_password(&payload.password) {
        AuthDecision::Allow => {
            debug!("password verified");
            (
                StatusCode::OK,
                JsonResponse(VerifyPasswordResponse {
                    status: "ok".into(),
                }),
            )
        }
        AuthDecision::Deny => (
            StatusCode::UNAUTHORIZED,
            JsonResponse(VerifyPasswordResponse {
                status: "invalid".into(),
            }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(value: &str) -> CredentialGate {
        CredentialGate::new(AuthMode::Header, Some(value.to_string()))
    }

    #[test]
    fn open_gate_allows_anything() {
        let gate = CredentialGate::new(AuthMode::Header, None);
        assert!(gate.is_open());
        assert_eq!(gate.authorize(Credential::Missing), AuthDecision::Allow);
        assert_eq!(gate.authorize(Credential::Secret("x")), AuthDecision::Allow);

        let empty = CredentialGate::new(AuthMode::Basic, Some(String::new()));
        assert!(empty.is_open());
    }

    #[test]
    fn shared_secret_requires_exact_match() {
        let gate = secret("secret");
        assert_eq!(gate.authorize(Credential::Secret("secret")), AuthDecision::Allow);
        assert_eq!(gate.authorize(Credential::Secret("wrong")), AuthDecision::Deny);
        assert_eq!(gate.authorize(Credential::Secret("")), AuthDecision::Deny);
        assert_eq!(gate.authorize(Credential::Secret("secret ")), AuthDecision::Deny);
        assert_eq!(gate.authorize(Credential::Missing), AuthDecision::Deny);
    }

    #[test]
    fn basic_gate_checks_fixed_username_and_password() {
        let gate = CredentialGate::new(AuthMode::Basic, Some("hunter2".into()));
        let ok = Credential::Basic {
            username: BASIC_AUTH_USER,
            password: "hunter2",
        };
        assert_eq!(gate.authorize(ok), AuthDecision::Allow);

        let bad_user = Credential::Basic {
            username: "root",
            password: "hunter2",
        };
        let bad_pass = Credential::Basic {
            username: BASIC_AUTH_USER,
            password: "hunter3",
        };
        assert_eq!(gate.authorize(bad_user), AuthDecision::Deny);
        assert_eq!(gate.authorize(bad_pass), AuthDecision::Deny);
        assert_eq!(gate.authorize(Credential::Secret("hunter2")), AuthDecision::Deny);
    }

    #[test]
    fn debug_output_never_contains_the_secret() {
        let header = format!("{:?}", secret("hunter2"));
        let basic = format!(
            "{:?}",
            CredentialGate::new(AuthMode::Basic, Some("hunter2".into()))
        );
        assert!(!header.contains("hunter2"));
        assert!(!basic.contains("hunter2"));
    }

    #[test]
    fn credential_is_read_from_password_header() {
        let gate = secret("hunter2");
        let mut headers = HeaderMap::new();
        headers.insert(PASSWORD_HEADER, HeaderValue::from_static("hunter2"));
        let credential = gate.credential_from(&headers, None);
        assert_eq!(gate.authorize(credential), AuthDecision::Allow);

        let empty = HeaderMap::new();
        let credential = gate.credential_from(&empty, None);
        assert!(matches!(credential, Credential::Missing));
    }

    #[test]
    fn shared_secret_of_any_length_is_compared_by_digest() {
        let gate = secret("hunter2");
        for supplied in ["h", "hunter", "hunter22", "hunter2hunter2"] {
            assert_eq!(gate.authorize(Credential::Secret(supplied)), AuthDecision::Deny);
        }
    }

    #[test]
    fn undecodable_authorization_counts_as_missing() {
        let gate = CredentialGate::new(AuthMode::Basic, Some("hunter2".into()));
        for value in ["Bearer abc.def", "Basic !!!notbase64"] {
            let mut headers = HeaderMap::new();
            headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
            let basic = gate.decode_basic(&headers);
            assert!(basic.is_none(), "{value}");
            let credential = gate.credential_from(&headers, basic.as_ref());
            assert!(matches!(credential, Credential::Missing));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic YWRtaW46aHVudGVyMg=="),
        );
        assert!(secret("hunter2").decode_basic(&headers).is_none());
        let basic = gate.decode_basic(&headers);
        let credential = gate.credential_from(&headers, basic.as_ref());
        assert_eq!(gate.authorize(credential), AuthDecision::Allow);
    }

    #[test]
    fn challenge_only_sent_for_basic_auth() {
        assert!(secret("x").challenge_headers().is_empty());
        let basic = CredentialGate::new(AuthMode::Basic, Some("x".into()));
        assert!(
            basic
                .challenge_headers()
                .contains_key(header::WWW_AUTHENTICATE)
        );
    }

    #[tokio::test]
    async fn verify_endpoint_reports_status() {
        let gate = Arc::new(CredentialGate::new(AuthMode::Basic, Some("pw".into())));
        let (status, JsonResponse(body)) = verify_password(
            Extension(gate.clone()),
            Json(VerifyPasswordRequest {
                password: "pw".into(),
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ok");

        let (status, JsonResponse(body)) = verify_password(
            Extension(gate),
            Json(VerifyPasswordRequest {
                password: "nope".into(),
            }),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.status, "invalid");
    }
}
