// src/validation.rs

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub &'static str);

/// National identity number: exactly 16 digits.
pub fn validate_nik(raw: &str) -> Result<String, ValidationError> {
    let nik = raw.trim();
    if nik.is_empty() {
        return Err(ValidationError("NIK is required"));
    }
    if nik.len() != 16 || !nik.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError("NIK must be exactly 16 digits"));
    }
    Ok(nik.to_string())
}

/// Optional field; `Ok(None)` when absent or blank.
pub fn validate_phone(raw: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(phone) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if !phone.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError("phone number may only contain digits"));
    }
    if phone.len() > 13 {
        return Err(ValidationError("phone number must be at most 13 digits"));
    }
    if phone.len() < 10 {
        return Err(ValidationError("phone number must be at least 10 digits"));
    }
    Ok(Some(phone.to_string()))
}

/// `local@domain.tld`, no whitespace anywhere.
pub fn validate_email(raw: &str) -> Result<String, ValidationError> {
    let email = raw.trim();
    if email.is_empty() {
        return Err(ValidationError("email is required"));
    }
    let invalid = ValidationError("email format is invalid");
    if email.chars().any(char::is_whitespace) {
        return Err(invalid);
    }
    let Some((local, domain)) = email.split_once('@') else {
        return Err(invalid);
    };
    if local.is_empty() || domain.contains('@') {
        return Err(invalid);
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) if !host.is_empty() && !tld.is_empty() => Ok(email.to_lowercase()),
        _ => Err(invalid),
    }
}

/// Password strength. With `is_update`, an empty password means "unchanged".
pub fn validate_password(password: &str, is_update: bool) -> Result<(), ValidationError> {
    if password.is_empty() {
        return if is_update {
            Ok(())
        } else {
            Err(ValidationError("password is required"))
        };
    }
    if password.chars().count() < 8 {
        return Err(ValidationError("password must be at least 8 characters"));
    }
    if !password.chars().any(|c| c.is_ascii_alphabetic()) {
        return Err(ValidationError("password must contain a letter"));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(ValidationError("password must contain a digit"));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase())
        || !password.chars().any(|c| c.is_ascii_uppercase())
    {
        return Err(ValidationError(
            "password must contain both upper and lower case letters",
        ));
    }
    Ok(())
}
