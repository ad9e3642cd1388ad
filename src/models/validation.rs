use crate::error::DispatchError;
use crate::models::message::{Channel, NotificationRequest};

const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;
const MAX_TEMPLATE_CODE_LEN: usize = 128;

/// Rejects malformed requests before any durable write happens.
pub fn validate_request(request: &NotificationRequest) -> Result<(), DispatchError> {
    if request.template_code.is_empty() {
        return Err(DispatchError::Validation(
            "template_code cannot be empty".to_string(),
        ));
    }

    if request.template_code.len() > MAX_TEMPLATE_CODE_LEN {
        return Err(DispatchError::Validation(format!(
            "template_code too long (maximum {} characters)",
            MAX_TEMPLATE_CODE_LEN
        )));
    }

    if request.idempotency_key.is_empty() {
        return Err(DispatchError::Validation(
            "idempotency_key cannot be empty".to_string(),
        ));
    }

    if request.idempotency_key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(DispatchError::Validation(format!(
            "idempotency_key too long (maximum {} characters)",
            MAX_IDEMPOTENCY_KEY_LEN
        )));
    }

    if !(1..=10).contains(&request.priority) {
        return Err(DispatchError::Validation(format!(
            "priority must be between 1 and 10, got {}",
            request.priority
        )));
    }

    Ok(())
}

pub fn validate_recipient(channel: Channel, recipient: &str) -> Result<(), DispatchError> {
    match channel {
        Channel::Email => validate_email(recipient),
        Channel::Push => validate_push_token(recipient),
    }
}

pub fn validate_email(address: &str) -> Result<(), DispatchError> {
    let Some((local, domain)) = address.split_once('@') else {
        return Err(DispatchError::Validation(
            "email address must contain '@'".to_string(),
        ));
    };

    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return Err(DispatchError::Validation(format!(
            "malformed email address '{}'",
            address
        )));
    }

    Ok(())
}

pub fn validate_push_token(token: &str) -> Result<(), DispatchError> {
    if token.is_empty() {
        return Err(DispatchError::Validation(
            "push token cannot be empty".to_string(),
        ));
    }

    if token.len() < 20 {
        return Err(DispatchError::Validation(
            "push token too short (minimum 20 characters)".to_string(),
        ));
    }

    if token.len() > 200 {
        return Err(DispatchError::Validation(
            "push token too long (maximum 200 characters)".to_string(),
        ));
    }

    let valid_chars = token
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == ':' || c == '.');

    if !valid_chars {
        return Err(DispatchError::Validation(
            "push token contains invalid characters".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use uuid::Uuid;

    use super::*;

    fn request() -> NotificationRequest {
        NotificationRequest {
            channel: Channel::Email,
            user_id: Uuid::new_v4(),
            template_code: "welcome_email".to_string(),
            variables: HashMap::new(),
            idempotency_key: "req_123".to_string(),
            priority: 5,
            metadata: None,
        }
    }

    #[test]
    fn accepts_well_formed_request() {
        assert!(validate_request(&request()).is_ok());
    }

    #[test]
    fn rejects_priority_out_of_range() {
        let mut low = request();
        low.priority = 0;
        assert!(validate_request(&low).is_err());

        let mut high = request();
        high.priority = 11;
        assert!(validate_request(&high).is_err());
    }

    #[test]
    fn rejects_empty_template_code() {
        let mut req = request();
        req.template_code = String::new();
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn rejects_empty_idempotency_key() {
        let mut req = request();
        req.idempotency_key = String::new();
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn validates_email_shape() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("not-an-address").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@nodot").is_err());
    }

    #[test]
    fn validates_push_token_shape() {
        assert!(validate_push_token("fcm_token_abcdef1234567890").is_ok());
        assert!(validate_push_token("short").is_err());
        assert!(validate_push_token(&"x".repeat(201)).is_err());
        assert!(validate_push_token("bad token with spaces and length").is_err());
    }
}
