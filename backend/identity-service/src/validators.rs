use thiserror::Error;
use validator::ValidationError;

/// Input validation and normalization for identity data

/// Maximum accepted password length in bytes. Argon2 has no practical ceiling;
/// the bound protects the hasher from oversized request bodies.
pub const MAX_PASSWORD_BYTES: usize = 1024;

pub const PASSWORD_BOUNDS_MESSAGE: &str = "password must be 1-1024 bytes";

/// International calling codes for supported storefront countries.
const CALLING_CODES: &[(&str, &str)] = &[
    ("AE", "971"),
    ("AU", "61"),
    ("BR", "55"),
    ("CA", "1"),
    ("CN", "86"),
    ("DE", "49"),
    ("EG", "20"),
    ("ES", "34"),
    ("FR", "33"),
    ("GB", "44"),
    ("GH", "233"),
    ("IE", "353"),
    ("IN", "91"),
    ("IT", "39"),
    ("JP", "81"),
    ("KE", "254"),
    ("NG", "234"),
    ("NL", "31"),
    ("US", "1"),
    ("ZA", "27"),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhoneError {
    #[error("phone number contains invalid characters")]
    InvalidCharacters,
    #[error("phone number has an invalid length")]
    InvalidLength,
    #[error("unsupported country: {0}")]
    UnsupportedCountry(String),
    #[error("phone number does not belong to country {0}")]
    CountryMismatch(String),
}

/// Non-empty and within [`MAX_PASSWORD_BYTES`]. No composition rules.
pub fn validate_password(password: &str) -> bool {
    !password.is_empty() && password.len() <= MAX_PASSWORD_BYTES
}

/// [`validate_password`] as a `#[validate(custom)]` hook.
pub fn password_field(password: &str) -> Result<(), ValidationError> {
    if validate_password(password) {
        return Ok(());
    }
    Err(ValidationError::new("password_length").with_message(PASSWORD_BOUNDS_MESSAGE.into()))
}

pub fn calling_code(country: &str) -> Option<&'static str> {
    CALLING_CODES
        .iter()
        .find(|(iso, _)| iso.eq_ignore_ascii_case(country))
        .map(|(_, code)| *code)
}

/// Normalize a phone number to E.164 (`+<country code><subscriber>`).
///
/// ## Arguments
///
/// * `raw` - Number as typed; international (`+234...`, `00234...`) or national (`0801...`)
/// * `country` - ISO 3166-1 alpha-2 code used to resolve national numbers
///
/// ## Returns
///
/// Canonical E.164 string, e.g. `+2348012345678`
pub fn normalize_phone(raw: &str, country: &str) -> Result<String, PhoneError> {
    let compact: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();

    let (international, digits) = if let Some(rest) = compact.strip_prefix('+') {
        (true, rest.to_string())
    } else if let Some(rest) = compact.strip_prefix("00") {
        (true, rest.to_string())
    } else {
        (false, compact)
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(PhoneError::InvalidCharacters);
    }

    let code = calling_code(country);
    let e164_digits = if international {
        if let Some(code) = code {
            if !digits.starts_with(code) {
                return Err(PhoneError::CountryMismatch(country.to_string()));
            }
        }
        digits
    } else {
        let code = code.ok_or_else(|| PhoneError::UnsupportedCountry(country.to_string()))?;
        let national = digits.strip_prefix('0').unwrap_or(&digits);
        if national.len() < 4 {
            return Err(PhoneError::InvalidLength);
        }
        format!("{}{}", code, national)
    };

    if e164_digits.len() < 8 || e164_digits.len() > 15 {
        return Err(PhoneError::InvalidLength);
    }

    Ok(format!("+{}", e164_digits))
}

/// Mask email for logging
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => match local.chars().next() {
            Some(first) if local.chars().count() > 2 => format!("{}***@{}", first, domain),
            _ => format!("**@{}", domain),
        },
        None => "***@***".to_string(),
    }
}

/// Mask phone number for logging
pub fn mask_phone(phone: &str) -> String {
    let count = phone.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let visible: String = phone.chars().skip(count - 4).collect();
    format!("****{}", visible)
}
