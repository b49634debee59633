use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;

use crate::errors::AppError;

pub const AUTH_COOKIE: &str = "auth-token";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Resolves the verified user id for a request, or `None` when there is no
/// usable session. Absence of a session is an ordinary outcome here, not an
/// error; callers that need a principal go through [`require_session`].
pub fn resolve_session(cookies: &Cookies) -> Option<String> {
    let token = cookies.get(AUTH_COOKIE).map(|c| c.value().to_string())?;
    user_id_from_token(&token)
}

pub fn require_session(cookies: &Cookies) -> Result<String, AppError> {
    resolve_session(cookies)
        .ok_or_else(|| AppError::Authentication(anyhow::anyhow!("No valid session")))
}

fn user_id_from_token(token: &str) -> Option<String> {
    let secret = std::env::var("SECRET_TOKEN").ok()?;
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::new(Algorithm::HS256),
    )
    .inspect_err(|e| tracing::debug!("Rejected auth token: {}", e))
    .ok()?;

    Some(token_data.claims.sub)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_for(user_id: &str, secret: &str) -> String {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_ref()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_resolves_user_id() {
        std::env::set_var("SECRET_TOKEN", "test-secret");
        let token = token_for("user-42", "test-secret");
        assert_eq!(user_id_from_token(&token), Some("user-42".to_string()));
    }

    #[test]
    fn garbage_token_resolves_to_no_session() {
        std::env::set_var("SECRET_TOKEN", "test-secret");
        assert_eq!(user_id_from_token("not-a-jwt"), None);
    }

    #[test]
    fn token_signed_with_wrong_secret_resolves_to_no_session() {
        std::env::set_var("SECRET_TOKEN", "test-secret");
        let token = token_for("user-42", "some-other-secret");
        assert_eq!(user_id_from_token(&token), None);
    }
}
