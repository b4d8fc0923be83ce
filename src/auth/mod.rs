use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::presence::{PresenceError, UserProfile};

const AUTH_COOKIE: &str = "auth_token";

/// Claims the presence layer cares about; everything else is ignored.
#[derive(Debug, Deserialize)]
struct ProfileClaims {
    sub: Option<String>,
    name: Option<String>,
    email: Option<String>,
}

/// Get the auth token from the `Authorization` header or the `auth_token` cookie.
pub fn get_auth_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        let auth_str = auth_header.to_str().ok()?;
        return Some(auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).to_string());
    }

    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    cookie::Cookie::split_parse(cookie_header)
        .flatten()
        .find(|c| c.name() == AUTH_COOKIE)
        .map(|c| c.value().to_string())
}

// Validate a HS256 JWT token and return the token data
fn validate_jwt(token: &str, secret: &str) -> Result<TokenData<ProfileClaims>, PresenceError> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    Ok(decode::<ProfileClaims>(token, &decoding_key, &validation)?)
}

/// Turn a signed token into the profile used for identity resolution.
pub fn profile_from_token(token: &str, secret: &str) -> Result<UserProfile, PresenceError> {
    let claims = validate_jwt(token, secret)?.claims;
    Ok(UserProfile {
        name: claims.name,
        email: claims.email,
        id: claims.sub,
    })
}

/// Profile for a request; anonymous when there is no usable token.
pub fn request_profile(headers: &HeaderMap, secret: Option<&str>) -> UserProfile {
    let (Some(token), Some(secret)) = (get_auth_token(headers), secret) else {
        return UserProfile::anonymous();
    };
    match profile_from_token(&token, secret) {
        Ok(profile) => {
            debug!("Token validated for {:?}", profile.id);
            profile
        }
        Err(e) => {
            warn!("Ignoring invalid auth token: {}", e);
            UserProfile::anonymous()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "presence-secret";

    fn token(claims: serde_json::Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn far_future() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[test]
    fn token_claims_become_a_profile() {
        let jwt = token(json!({
            "sub": "u-1",
            "name": "Alice",
            "email": "alice@example.com",
            "exp": far_future(),
        }));
        let profile = profile_from_token(&jwt, SECRET).unwrap();
        assert_eq!(profile.id.as_deref(), Some("u-1"));
        assert_eq!(profile.name.as_deref(), Some("Alice"));
        assert_eq!(profile.email.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let jwt = token(json!({"sub": "u-1", "exp": far_future()}));
        assert!(matches!(
            profile_from_token(&jwt, "other"),
            Err(PresenceError::Token(_))
        ));
    }

    #[test]
    fn token_is_read_from_header_or_cookie() {
        let mut headers = HeaderMap::new();
        assert_eq!(get_auth_token(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; auth_token=abc"));
        assert_eq!(get_auth_token(&headers).as_deref(), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer xyz"));
        assert_eq!(get_auth_token(&headers).as_deref(), Some("xyz"));
    }

    #[test]
    fn missing_or_invalid_token_is_anonymous() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_profile(&headers, Some(SECRET)), UserProfile::anonymous());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer nope"));
        assert_eq!(request_profile(&headers, Some(SECRET)), UserProfile::anonymous());

        let jwt = token(json!({"sub": "u-2", "name": "Bob", "exp": far_future()}));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", jwt)).unwrap());
        assert_eq!(request_profile(&headers, None), UserProfile::anonymous());
        assert_eq!(request_profile(&headers, Some(SECRET)).name.as_deref(), Some("Bob"));
    }
}
