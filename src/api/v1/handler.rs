use super::error::*;
use crate::application_port::*;
use crate::domain_model::{User, UserId};
use crate::server::CookiePolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use warp::http::header::{HeaderMap, HeaderValue, SET_COOKIE};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{self, Reply, reject};

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(code: ApiErrorCode, message: impl Into<String>) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Public shape of a user. The provider subject stays server side.
#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: UserId,
    pub email: Option<String>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        UserView {
            id: user.id,
            email: user.email,
            email_verified: user.email_verified,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub id_token: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub auth_tokens: AuthTokens,
    pub user: UserView,
}

pub async fn login(
    body: LoginRequest,
    auth_service: Arc<dyn AuthService>,
    cookies: Arc<CookiePolicy>,
) -> Result<Response, warp::Rejection> {
    let login_result = auth_service
        .login(&body.id_token)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    let set_cookies = token_cookies(&cookies, &login_result.tokens);
    let login_response = LoginResponse {
        auth_tokens: login_result.tokens,
        user: login_result.user.into(),
    };

    let mut response = warp::reply::json(&ApiResponse::ok(login_response)).into_response();
    append_cookies(response.headers_mut(), set_cookies)?;
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn refresh(
    body: Option<RefreshRequest>,
    cookie: Option<String>,
    auth_service: Arc<dyn AuthService>,
    cookies: Arc<CookiePolicy>,
) -> Result<Response, warp::Rejection> {
    let refresh_token = body
        .map(|b| b.refresh_token)
        .or(cookie)
        .ok_or_else(|| reject::custom(ApiErrorCode::Unauthorized))?;

    let tokens = auth_service
        .refresh(&refresh_token)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    let set_cookies = token_cookies(&cookies, &tokens);
    let mut response = warp::reply::json(&ApiResponse::ok(tokens)).into_response();
    append_cookies(response.headers_mut(), set_cookies)?;
    Ok(response)
}

pub async fn logout(
    body: Option<RefreshRequest>,
    cookie: Option<String>,
    auth_service: Arc<dyn AuthService>,
    cookies: Arc<CookiePolicy>,
) -> Result<Response, warp::Rejection> {
    if let Some(refresh_token) = body.map(|b| b.refresh_token).or(cookie) {
        auth_service
            .logout(&refresh_token)
            .await
            .map_err(ApiErrorCode::from)
            .map_err(reject::custom)?;
    }

    let mut response = StatusCode::NO_CONTENT.into_response();
    append_cookies(
        response.headers_mut(),
        vec![
            clear_cookie(&cookies, ACCESS_COOKIE),
            clear_cookie(&cookies, REFRESH_COOKIE),
        ],
    )?;
    Ok(response)
}

pub async fn me(user: User) -> Result<impl warp::Reply, warp::Rejection> {
    Ok(warp::reply::json(&ApiResponse::ok(UserView::from(user))))
}

fn token_cookies(policy: &CookiePolicy, tokens: &AuthTokens) -> Vec<String> {
    vec![
        cookie(
            policy,
            ACCESS_COOKIE,
            &tokens.access_token.0,
            policy.access_max_age_secs,
        ),
        cookie(
            policy,
            REFRESH_COOKIE,
            &tokens.refresh_token.0,
            policy.refresh_max_age_secs,
        ),
    ]
}

fn cookie(policy: &CookiePolicy, name: &str, value: &str, max_age_secs: i64) -> String {
    let mut cookie =
        format!("{name}={value}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age_secs}");
    if policy.secure {
        cookie.push_str("; Secure");
    }
    if let Some(domain) = &policy.domain {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    cookie
}

fn clear_cookie(policy: &CookiePolicy, name: &str) -> String {
    cookie(policy, name, "", 0)
}

fn append_cookies(headers: &mut HeaderMap, cookies: Vec<String>) -> Result<(), warp::Rejection> {
    for cookie in cookies {
        let value = HeaderValue::from_str(&cookie)
            .map_err(ApiErrorCode::internal)
            .map_err(reject::custom)?;
        headers.append(SET_COOKIE, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(secure: bool, domain: Option<&str>) -> CookiePolicy {
        CookiePolicy {
            secure,
            domain: domain.map(str::to_string),
            access_max_age_secs: 900,
            refresh_max_age_secs: 2_592_000,
        }
    }

    #[test]
    fn cookie_attributes_follow_policy() {
        let c = cookie(&policy(false, None), ACCESS_COOKIE, "abc", 900);
        assert_eq!(c, "access_token=abc; HttpOnly; SameSite=Lax; Path=/; Max-Age=900");

        let c = cookie(&policy(true, Some("example.com")), REFRESH_COOKIE, "r", 60);
        assert!(c.ends_with("; Secure; Domain=example.com"));
    }

    #[test]
    fn cleared_cookie_expires_immediately() {
        let c = clear_cookie(&policy(false, None), REFRESH_COOKIE);
        assert!(c.starts_with("refresh_token=; "));
        assert!(c.contains("Max-Age=0"));
    }
}
