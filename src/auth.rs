use axum::http::HeaderMap;

use crate::error::GatewayError;

pub fn extract_bearer(headers: &HeaderMap) -> Result<String, GatewayError> {
    let authorization = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| GatewayError::Unauthorized("Missing authorization header".to_string()))?;

    let authorization = authorization
        .to_str()
        .map_err(|_| GatewayError::Unauthorized("Invalid authorization header".to_string()))?;

    let token = authorization.strip_prefix("Bearer ").ok_or_else(|| {
        GatewayError::Unauthorized("Authorization must use Bearer token".to_string())
    })?;

    if token.trim().is_empty() {
        return Err(GatewayError::Unauthorized(
            "Bearer token is empty".to_string(),
        ));
    }

    Ok(token.to_string())
}

pub fn validate_gateway_key(gateway_api_keys: &[String], token: &str) -> Result<(), GatewayError> {
    if gateway_api_keys.is_empty() {
        return Ok(());
    }

    let is_allowed = gateway_api_keys
        .iter()
        .any(|configured_key| configured_key == token);

    if is_allowed {
        return Ok(());
    }

    Err(GatewayError::Unauthorized(
        "Invalid gateway API key".to_string(),
    ))
}

/// Checks the caller's key. An empty key list leaves the gateway open,
/// including to requests without an `Authorization` header.
pub fn authorize(gateway_api_keys: &[String], headers: &HeaderMap) -> Result<(), GatewayError> {
    if gateway_api_keys.is_empty() {
        return Ok(());
    }

    let token = extract_bearer(headers)?;
    validate_gateway_key(gateway_api_keys, &token)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use axum::http::header::AUTHORIZATION;

    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).expect("header"));
        headers
    }

    #[test]
    fn bearer_token_is_required_when_keys_are_configured() {
        let keys = vec!["gw-1".to_string()];
        assert!(authorize(&keys, &headers("Bearer gw-1")).is_ok());
        assert!(matches!(
            authorize(&keys, &headers("Bearer gw-2")),
            Err(GatewayError::Unauthorized(_))
        ));
        assert!(matches!(
            authorize(&keys, &headers("Basic gw-1")),
            Err(GatewayError::Unauthorized(_))
        ));
        assert!(matches!(
            authorize(&keys, &HeaderMap::new()),
            Err(GatewayError::Unauthorized(_))
        ));
    }

    #[test]
    fn open_gateway_accepts_anything() {
        assert!(authorize(&[], &HeaderMap::new()).is_ok());
        assert!(validate_gateway_key(&[], "anything").is_ok());
    }

    #[test]
    fn empty_bearer_is_rejected() {
        assert!(extract_bearer(&headers("Bearer  ")).is_err());
    }
}
