use super::error::*;
use super::handler::{self, ACCESS_COOKIE, REFRESH_COOKIE};
use crate::application_port::AuthService;
use crate::domain_model::User;
use crate::server::*;
use futures_util::{Stream, TryStreamExt};
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::debug;
use warp::hyper::body::Buf;
use warp::{Filter, reject};

const MAX_BODY_BYTES: u64 = 16 * 1024;

pub fn routes(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let cookies = Arc::new(server.cookies.clone());

    let login = warp::post()
        .and(warp::path("auth"))
        .and(warp::path("login"))
        .and(warp::path::end())
        .and(required_json())
        .and(with(server.auth_service.clone()))
        .and(with(cookies.clone()))
        .and_then(handler::login);

    let refresh = warp::post()
        .and(warp::path("auth"))
        .and(warp::path("refresh"))
        .and(warp::path::end())
        .and(optional_json())
        .and(warp::cookie::optional::<String>(REFRESH_COOKIE))
        .and(with(server.auth_service.clone()))
        .and(with(cookies.clone()))
        .and_then(handler::refresh);

    let logout = warp::post()
        .and(warp::path("auth"))
        .and(warp::path("logout"))
        .and(warp::path::end())
        .and(lenient_json())
        .and(warp::cookie::optional::<String>(REFRESH_COOKIE))
        .and(with(server.auth_service.clone()))
        .and(with(cookies))
        .and_then(handler::logout);

    let me = warp::get()
        .and(warp::path("auth"))
        .and(warp::path("me"))
        .and(warp::path::end())
        .and(with_verification(server.auth_service.clone()))
        .and_then(handler::me);

    login.or(refresh).or(logout).or(me)
}

fn with<ServiceType>(
    service: Arc<ServiceType>,
) -> impl Filter<Extract = (Arc<ServiceType>,), Error = Infallible> + Clone
where
    ServiceType: Send + Sync + ?Sized,
{
    warp::any().map(move || service.clone())
}

/// Bearer header first, then the access cookie.
fn with_verification(
    auth_service: Arc<dyn AuthService>,
) -> impl Filter<Extract = (User,), Error = warp::Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(warp::cookie::optional::<String>(ACCESS_COOKIE))
        .and_then(move |header: Option<String>, cookie: Option<String>| {
            let auth_service = auth_service.clone();
            async move {
                let token = match header {
                    Some(header) => header.strip_prefix("Bearer ").map(str::to_string),
                    None => cookie,
                }
                .ok_or_else(|| reject::custom(ApiErrorCode::Unauthorized))?;

                auth_service
                    .authenticate(&token)
                    .await
                    .map_err(ApiErrorCode::from)
                    .map_err(reject::custom)
            }
        })
}

/// Buffers the body, refusing anything over [`MAX_BODY_BYTES`] whether or
/// not a content-length was declared.
fn capped_body() -> impl Filter<Extract = (Vec<u8>,), Error = warp::Rejection> + Clone {
    warp::header::optional::<u64>("content-length")
        .and(warp::body::stream())
        .and_then(read_capped)
}

async fn read_capped<S, B>(declared: Option<u64>, body: S) -> Result<Vec<u8>, warp::Rejection>
where
    S: Stream<Item = Result<B, warp::Error>> + Send,
    B: Buf + Send,
{
    if declared.is_some_and(|len| len > MAX_BODY_BYTES) {
        return Err(reject::custom(ApiErrorCode::PayloadTooLarge));
    }

    let mut body = Box::pin(body);
    let mut buf = Vec::new();
    while let Some(mut chunk) = body.try_next().await.map_err(|e| {
        debug!("failed reading request body: {}", e);
        reject::custom(ApiErrorCode::BadRequest)
    })? {
        if (buf.len() + chunk.remaining()) as u64 > MAX_BODY_BYTES {
            return Err(reject::custom(ApiErrorCode::PayloadTooLarge));
        }
        while chunk.has_remaining() {
            let read = {
                let bytes = chunk.chunk();
                buf.extend_from_slice(bytes);
                bytes.len()
            };
            chunk.advance(read);
        }
    }
    Ok(buf)
}

fn is_blank(body: &[u8]) -> bool {
    body.iter().all(u8::is_ascii_whitespace)
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, warp::Rejection> {
    serde_json::from_slice::<T>(body).map_err(|e| {
        debug!("rejected request body: {}", e);
        reject::custom(ApiErrorCode::BadRequest)
    })
}

fn required_json<T>() -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone
where
    T: DeserializeOwned + Send,
{
    capped_body().and_then(|body: Vec<u8>| async move { decode::<T>(&body) })
}

/// An empty body is `None`; anything else must be valid JSON.
fn optional_json<T>() -> impl Filter<Extract = (Option<T>,), Error = warp::Rejection> + Clone
where
    T: DeserializeOwned + Send,
{
    capped_body().and_then(|body: Vec<u8>| async move {
        if is_blank(&body) {
            return Ok(None);
        }
        decode::<T>(&body).map(Some)
    })
}

/// Like [`optional_json`], but a body that does not decode is treated as absent.
fn lenient_json<T>() -> impl Filter<Extract = (Option<T>,), Error = warp::Rejection> + Clone
where
    T: DeserializeOwned + Send,
{
    capped_body().map(|body: Vec<u8>| {
        if is_blank(&body) {
            None
        } else {
            decode::<T>(&body).ok()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1::recover_error;
    use crate::application_impl::*;
    use crate::domain_port::*;
    use crate::infra_memory::*;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::{Value, json};
    use warp::http::StatusCode;
    use warp::http::header::SET_COOKIE;

    fn test_server() -> Arc<Server> {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap(),
        ));
        let token_codec = Arc::new(JwtHs256Codec::new(
            JwtConfig {
                issuer: "passage.test".to_string(),
                access_ttl: Duration::minutes(15),
                signing_key: b"router-test-secret-0123456789abcdef".to_vec(),
            },
            clock.clone(),
        ));
        let auth_service = RealAuthService::new(
            Arc::new(FakeProviderVerifier::new(clock.clone())),
            Arc::new(MemoryUserRepo::new()),
            token_codec,
            Arc::new(MemoryRefreshSessionStore::new()),
            clock,
            Duration::days(30),
        );
        let cookies = CookiePolicy {
            secure: true,
            domain: None,
            access_max_age_secs: 15 * 60,
            refresh_max_age_secs: 30 * 24 * 60 * 60,
        };
        Arc::new(Server::from_parts(Arc::new(auth_service), cookies))
    }

    fn api(
        server: Arc<Server>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone {
        routes(server).recover(recover_error)
    }

    fn json_body(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    async fn login(server: &Arc<Server>, subject: &str) -> Value {
        let id_token = FakeProviderVerifier::token_for(subject, Some("a@example.com"));
        let res = warp::test::request()
            .method("POST")
            .path("/auth/login")
            .json(&json!({ "id_token": id_token }))
            .reply(&api(server.clone()))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        json_body(res.body())["data"].clone()
    }

    #[tokio::test]
    async fn login_returns_tokens_user_and_cookies() {
        let server = test_server();
        let id_token = FakeProviderVerifier::token_for("sub-1", Some("a@example.com"));
        let res = warp::test::request()
            .method("POST")
            .path("/auth/login")
            .json(&json!({ "id_token": id_token }))
            .reply(&api(server))
            .await;

        assert_eq!(res.status(), StatusCode::OK);
        let cookies: Vec<_> = res
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].starts_with("access_token="));
        assert!(cookies[1].starts_with("refresh_token="));
        assert!(cookies.iter().all(|c| c.contains("HttpOnly") && c.contains("Secure")));

        let body = json_body(res.body());
        assert_eq!(body["success"], true);
        let data = &body["data"];
        assert!(data["access_token"].is_string());
        assert!(data["refresh_token"].is_string());
        assert!(data["access_token_expires_at"].is_string());
        assert_eq!(data["user"]["email"], "a@example.com");
        assert!(data["user"].get("provider_subject").is_none());
    }

    #[tokio::test]
    async fn bad_provider_token_is_a_generic_401() {
        let res = warp::test::request()
            .method("POST")
            .path("/auth/login")
            .json(&json!({ "id_token": "not-a-token" }))
            .reply(&api(test_server()))
            .await;

        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(res.body());
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "Unauthorized");
        assert_eq!(body["error"]["message"], "Authentication failed");
    }

    #[tokio::test]
    async fn malformed_login_body_is_400() {
        let res = warp::test::request()
            .method("POST")
            .path("/auth/login")
            .header("content-type", "application/json")
            .body("{\"token\":")
            .reply(&api(test_server()))
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn refresh_via_body_then_replay_is_rejected() {
        let server = test_server();
        let data = login(&server, "sub-1").await;
        let refresh_token = data["refresh_token"].as_str().unwrap().to_string();

        let res = warp::test::request()
            .method("POST")
            .path("/auth/refresh")
            .json(&json!({ "refresh_token": refresh_token }))
            .reply(&api(server.clone()))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let rotated = json_body(res.body())["data"]["refresh_token"]
            .as_str()
            .unwrap()
            .to_string();
        assert_ne!(rotated, refresh_token);

        let res = warp::test::request()
            .method("POST")
            .path("/auth/refresh")
            .json(&json!({ "refresh_token": refresh_token }))
            .reply(&api(server.clone()))
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        // the replay revoked the successor too
        let res = warp::test::request()
            .method("POST")
            .path("/auth/refresh")
            .json(&json!({ "refresh_token": rotated }))
            .reply(&api(server))
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn refresh_reads_the_cookie() {
        let server = test_server();
        let data = login(&server, "sub-1").await;
        let refresh_token = data["refresh_token"].as_str().unwrap();

        let res = warp::test::request()
            .method("POST")
            .path("/auth/refresh")
            .header("cookie", format!("refresh_token={refresh_token}"))
            .reply(&api(server))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get_all(SET_COOKIE).iter().count(), 2);
    }

    #[tokio::test]
    async fn refresh_without_token_is_401() {
        let res = warp::test::request()
            .method("POST")
            .path("/auth/refresh")
            .reply(&api(test_server()))
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_is_204_and_clears_cookies() {
        let server = test_server();
        let data = login(&server, "sub-1").await;
        let refresh_token = data["refresh_token"].as_str().unwrap().to_string();

        for _ in 0..2 {
            let res = warp::test::request()
                .method("POST")
                .path("/auth/logout")
                .json(&json!({ "refresh_token": refresh_token }))
                .reply(&api(server.clone()))
                .await;
            assert_eq!(res.status(), StatusCode::NO_CONTENT);
            assert!(
                res.headers()
                    .get_all(SET_COOKIE)
                    .iter()
                    .all(|v| v.to_str().unwrap().contains("Max-Age=0"))
            );
        }

        let res = warp::test::request()
            .method("POST")
            .path("/auth/refresh")
            .json(&json!({ "refresh_token": refresh_token }))
            .reply(&api(server))
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_without_token_still_succeeds() {
        let res = warp::test::request()
            .method("POST")
            .path("/auth/logout")
            .reply(&api(test_server()))
            .await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn logout_ignores_bodies_it_cannot_read() {
        let server = test_server();
        for body in ["{}", "not json", r#"{"refresh_token": 5}"#] {
            let res = warp::test::request()
                .method("POST")
                .path("/auth/logout")
                .header("content-type", "application/json")
                .body(body)
                .reply(&api(server.clone()))
                .await;
            assert_eq!(res.status(), StatusCode::NO_CONTENT, "body {body:?}");
        }
    }

    #[tokio::test]
    async fn logout_falls_back_to_cookie_when_body_is_unreadable() {
        let server = test_server();
        let data = login(&server, "sub-1").await;
        let refresh_token = data["refresh_token"].as_str().unwrap().to_string();

        let res = warp::test::request()
            .method("POST")
            .path("/auth/logout")
            .header("cookie", format!("refresh_token={refresh_token}"))
            .body("not json")
            .reply(&api(server.clone()))
            .await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let res = warp::test::request()
            .method("POST")
            .path("/auth/refresh")
            .json(&json!({ "refresh_token": refresh_token }))
            .reply(&api(server))
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn refresh_still_rejects_malformed_bodies() {
        let res = warp::test::request()
            .method("POST")
            .path("/auth/refresh")
            .body("not json")
            .reply(&api(test_server()))
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_bodies_are_refused() {
        let server = test_server();
        let big = vec![b' '; MAX_BODY_BYTES as usize + 1];
        for path in ["/auth/login", "/auth/refresh", "/auth/logout"] {
            let res = warp::test::request()
                .method("POST")
                .path(path)
                .body(big.clone())
                .reply(&api(server.clone()))
                .await;
            assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE, "{path}");
        }
    }

    #[tokio::test]
    async fn body_cap_does_not_trust_declared_length() {
        let res = warp::test::request()
            .method("POST")
            .path("/auth/logout")
            .body(vec![b' '; MAX_BODY_BYTES as usize + 1])
            .header("content-length", "2")
            .reply(&api(test_server()))
            .await;
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn me_accepts_bearer_or_cookie() {
        let server = test_server();
        let data = login(&server, "sub-1").await;
        let access_token = data["access_token"].as_str().unwrap();

        let res = warp::test::request()
            .method("GET")
            .path("/auth/me")
            .header("authorization", format!("Bearer {access_token}"))
            .reply(&api(server.clone()))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res.body())["data"]["id"], data["user"]["id"]);

        let res = warp::test::request()
            .method("GET")
            .path("/auth/me")
            .header("cookie", format!("access_token={access_token}"))
            .reply(&api(server))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn me_rejects_missing_or_bad_tokens() {
        let server = test_server();
        for header in [None, Some("Bearer garbage"), Some("Basic dXNlcjpwdw==")] {
            let mut req = warp::test::request().method("GET").path("/auth/me");
            if let Some(header) = header {
                req = req.header("authorization", header);
            }
            let res = req.reply(&api(server.clone())).await;
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let res = warp::test::request()
            .method("GET")
            .path("/auth/nope")
            .reply(&api(test_server()))
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
