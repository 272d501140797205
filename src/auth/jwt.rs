use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::config::JwtConfig;
use crate::error::AppError;

use super::Claims;

pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(config: &JwtConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::default();

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        }

        Self {
            decoding_key,
            validation,
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AppError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }

    /// Authenticate a request from a query token or an `Authorization: Bearer` header
    pub fn authenticate(
        &self,
        query_token: Option<&str>,
        headers: &HeaderMap,
    ) -> Result<Claims, AppError> {
        let token = extract_token(query_token, headers)
            .ok_or_else(|| AppError::Auth("Missing authentication token".to_string()))?;
        self.validate(token)
    }
}

/// Query parameter wins over the header; browsers cannot set headers on WebSocket upgrades.
fn extract_token<'a>(query_token: Option<&'a str>, headers: &'a HeaderMap) -> Option<&'a str> {
    if let Some(token) = query_token.filter(|t| !t.is_empty()) {
        return Some(token);
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn create_test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-key-for-testing".to_string(),
            issuer: None,
            audience: None,
        }
    }

    fn create_test_token(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn test_claims() -> Claims {
        Claims {
            sub: "user-123".to_string(),
            exp: chrono::Utc::now().timestamp() + 3600,
            iat: chrono::Utc::now().timestamp(),
            role: Role::Teacher,
            name: Some("Ada Teacher".to_string()),
            extra: Default::default(),
        }
    }

    #[test]
    fn test_valid_token() {
        let config = create_test_config();
        let validator = JwtValidator::new(&config);

        let token = create_test_token(&test_claims(), &config.secret);
        let validated = validator.validate(&token).unwrap();

        assert_eq!(validated.sub, "user-123");
        assert_eq!(validated.role, Role::Teacher);
        assert_eq!(validated.display_name(), "Ada Teacher");
    }

    #[test]
    fn test_invalid_token() {
        let config = create_test_config();
        let validator = JwtValidator::new(&config);

        let result = validator.validate("invalid-token");
        assert!(result.is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let validator = JwtValidator::new(&create_test_config());
        let token = create_test_token(&test_claims(), "another-secret");
        assert!(validator.validate(&token).is_err());
    }

    #[test]
    fn test_authenticate_from_header() {
        let config = create_test_config();
        let validator = JwtValidator::new(&config);
        let token = create_test_token(&test_claims(), &config.secret);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );

        let claims = validator.authenticate(None, &headers).unwrap();
        assert_eq!(claims.user_id(), "user-123");
    }

    #[test]
    fn test_authenticate_missing_token() {
        let validator = JwtValidator::new(&create_test_config());
        let result = validator.authenticate(None, &HeaderMap::new());
        assert!(matches!(result, Err(AppError::Auth(_))));
    }
}
