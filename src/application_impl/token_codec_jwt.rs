use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::Clock;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const ACCESS_TYPE: &str = "access";
const REFRESH_VALUE_BYTES: usize = 32;

#[derive(Clone)]
pub struct JwtConfig {
    pub issuer: String,
    pub access_ttl: Duration,
    pub signing_key: Vec<u8>,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("issuer", &self.issuer)
            .field("access_ttl", &self.access_ttl)
            .field("signing_key", &"***")
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    sub: String,
    iat: i64,
    exp: i64,
    iss: String,
    typ: String,
    jti: String,
}

pub struct JwtHs256Codec {
    cfg: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    clock: Arc<dyn Clock>,
}

impl JwtHs256Codec {
    pub fn new(cfg: JwtConfig, clock: Arc<dyn Clock>) -> Self {
        let encoding_key = EncodingKey::from_secret(&cfg.signing_key);
        let decoding_key = DecodingKey::from_secret(&cfg.signing_key);
        JwtHs256Codec {
            cfg,
            encoding_key,
            decoding_key,
            clock,
        }
    }

    fn validation(&self) -> Validation {
        let mut v = Validation::new(Algorithm::HS256);
        // expiry is checked against the injected clock below
        v.validate_exp = false;
        v.validate_aud = false;
        v.set_required_spec_claims(&["exp", "iss", "sub"]);
        v.set_issuer(&[self.cfg.issuer.clone()]);
        v
    }

    #[inline]
    fn parse_user_id(sub: &str) -> Result<UserId, AuthError> {
        sub.parse::<UserId>().map_err(|_| AuthError::TokenInvalid)
    }
}

impl TokenCodec for JwtHs256Codec {
    fn issue_access(&self, user: UserId) -> Result<(AccessToken, DateTime<Utc>), AuthError> {
        let iat_dt = self.clock.now();
        let exp_dt = iat_dt
            .checked_add_signed(self.cfg.access_ttl)
            .ok_or_else(|| AuthError::InternalError("access expiry out of range".to_string()))?;
        let claims = AccessClaims {
            sub: user.to_string(),
            iat: iat_dt.timestamp(),
            exp: exp_dt.timestamp(),
            iss: self.cfg.issuer.clone(),
            typ: ACCESS_TYPE.to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InternalError(e.to_string()))?;
        Ok((AccessToken(token), exp_dt))
    }

    fn issue_refresh_value(&self) -> RefreshToken {
        let mut bytes = [0u8; REFRESH_VALUE_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        RefreshToken(hex::encode(bytes))
    }

    fn hash_refresh_value(&self, token: &str) -> TokenHash {
        TokenHash(hex::encode(Sha256::digest(token.as_bytes())))
    }

    fn verify_access(&self, token: &AccessToken) -> Result<VerifiedAccess, AuthError> {
        let data = decode::<AccessClaims>(&token.0, &self.decoding_key, &self.validation())
            .map_err(|e| {
                tracing::debug!(error = %e, "access token rejected");
                AuthError::TokenInvalid
            })?;
        let claims = data.claims;

        if claims.typ != ACCESS_TYPE {
            return Err(AuthError::TokenInvalid);
        }
        let user_id = Self::parse_user_id(&claims.sub)?;
        let expires_at =
            DateTime::<Utc>::from_timestamp(claims.exp, 0).ok_or(AuthError::TokenInvalid)?;
        if self.clock.now() >= expires_at {
            return Err(AuthError::TokenExpired);
        }

        Ok(VerifiedAccess {
            user_id,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_port::ManualClock;
    use chrono::TimeZone;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn codec_at(clock: Arc<ManualClock>) -> JwtHs256Codec {
        JwtHs256Codec::new(
            JwtConfig {
                issuer: "passage.test".to_string(),
                access_ttl: Duration::minutes(15),
                signing_key: SECRET.to_vec(),
            },
            clock,
        )
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn access_token_round_trips() {
        let clock = Arc::new(ManualClock::new(start()));
        let codec = codec_at(clock);
        let user = UserId::new_v4();

        let (token, exp) = codec.issue_access(user).unwrap();
        assert_eq!(exp, start() + Duration::minutes(15));

        let verified = codec.verify_access(&token).unwrap();
        assert_eq!(verified.user_id, user);
        assert_eq!(verified.expires_at, exp);
    }

    #[test]
    fn access_token_expires_exactly_at_ttl() {
        let clock = Arc::new(ManualClock::new(start()));
        let codec = codec_at(clock.clone());
        let (token, _) = codec.issue_access(UserId::new_v4()).unwrap();

        clock.advance(Duration::minutes(15) - Duration::seconds(1));
        assert!(codec.verify_access(&token).is_ok());

        clock.advance(Duration::seconds(1));
        assert!(matches!(
            codec.verify_access(&token),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn rejects_foreign_signature_and_issuer() {
        let clock = Arc::new(ManualClock::new(start()));
        let codec = codec_at(clock.clone());
        let (token, _) = codec.issue_access(UserId::new_v4()).unwrap();

        let other_key = JwtHs256Codec::new(
            JwtConfig {
                issuer: "passage.test".to_string(),
                access_ttl: Duration::minutes(15),
                signing_key: b"another-secret-another-secret-xx".to_vec(),
            },
            clock.clone(),
        );
        assert!(matches!(
            other_key.verify_access(&token),
            Err(AuthError::TokenInvalid)
        ));

        let other_issuer = JwtHs256Codec::new(
            JwtConfig {
                issuer: "someone.else".to_string(),
                access_ttl: Duration::minutes(15),
                signing_key: SECRET.to_vec(),
            },
            clock,
        );
        assert!(matches!(
            other_issuer.verify_access(&token),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn unrepresentable_expiry_is_an_error() {
        let codec = JwtHs256Codec::new(
            JwtConfig {
                issuer: "passage.test".to_string(),
                access_ttl: Duration::days(200_000_000),
                signing_key: SECRET.to_vec(),
            },
            Arc::new(ManualClock::new(start())),
        );
        assert!(matches!(
            codec.issue_access(UserId::new_v4()),
            Err(AuthError::InternalError(_))
        ));
    }

    #[test]
    fn rejects_tampered_payload() {
        let codec = codec_at(Arc::new(ManualClock::new(start())));
        let (token, _) = codec.issue_access(UserId::new_v4()).unwrap();

        let mut parts: Vec<String> = token.0.split('.').map(str::to_string).collect();
        parts[1].push('A');
        let tampered = AccessToken(parts.join("."));
        assert!(matches!(
            codec.verify_access(&tampered),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn rejects_non_access_type() {
        let codec = codec_at(Arc::new(ManualClock::new(start())));
        let claims = AccessClaims {
            sub: UserId::new_v4().to_string(),
            iat: start().timestamp(),
            exp: (start() + Duration::hours(1)).timestamp(),
            iss: "passage.test".to_string(),
            typ: "refresh".to_string(),
            jti: "x".to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        assert!(matches!(
            codec.verify_access(&AccessToken(token)),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn refresh_values_are_random_and_hashed() {
        let codec = codec_at(Arc::new(ManualClock::new(start())));
        let a = codec.issue_refresh_value();
        let b = codec.issue_refresh_value();
        assert_ne!(a, b);
        assert_eq!(a.0.len(), REFRESH_VALUE_BYTES * 2);

        let hash = codec.hash_refresh_value(&a.0);
        assert_eq!(hash, codec.hash_refresh_value(&a.0));
        assert_ne!(hash.as_str(), a.0);
        assert_eq!(hash.as_str().len(), 64);
    }
}
