use serde::Deserialize;
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

/// Redirect URLs come from the caller; reject anything that does not parse
/// as an absolute http(s) URL before it reaches a gateway.
pub fn validate_redirect_url(raw: &str, field: &str) -> Result<(), AppError> {
    match url::Url::parse(raw) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(AppError::BadRequest(format!(
            "{field} must be an absolute http(s) URL."
        ))),
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateCheckoutInput {
    pub gateway: String,
    #[validate(length(min = 1, max = 255))]
    pub landlord_id: String,
    #[validate(length(min = 1, max = 255))]
    pub property_id: String,
    #[validate(email)]
    pub tenant_email: String,
    pub amount: f64,
    #[validate(length(min = 3, max = 3))]
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    pub invoice_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct AcceptInviteInput {
    #[validate(length(min = 1, max = 255))]
    pub token: String,
    #[validate(length(min = 1, max = 255))]
    pub tenant_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenancyPath {
    pub tenancy_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoicePath {
    pub invoice_id: String,
}

#[cfg(test)]
mod tests {
    use super::validate_redirect_url;

    #[test]
    fn accepts_absolute_http_urls_only() {
        assert!(validate_redirect_url("https://app.example.com/paid", "success_url").is_ok());
        assert!(validate_redirect_url("http://localhost:3000/paid", "success_url").is_ok());
        assert!(validate_redirect_url("ftp://example.com", "success_url").is_err());
        assert!(validate_redirect_url("/relative/path", "success_url").is_err());
        assert!(validate_redirect_url("not a url", "success_url").is_err());
    }
}
