//! Validation helpers for DTOs.

use validator::ValidationError;

/// Characters used in access codes; look-alikes (0/O, 1/I) are left out.
pub const ACCESS_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
/// Length of an access code.
pub const ACCESS_CODE_LEN: usize = 6;

/// Validates that an access code has the expected length and alphabet.
///
/// # Examples
///
/// ```ignore
/// validate_access_code("K7QX2M") // Ok
/// validate_access_code("k7qx2m") // Err - lowercase
/// validate_access_code("K7QX2")  // Err - too short
/// ```
pub fn validate_access_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != ACCESS_CODE_LEN {
        let mut err = ValidationError::new("access_code_length");
        err.message = Some(
            format!(
                "Access code must be exactly {ACCESS_CODE_LEN} characters (got {})",
                code.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !code.bytes().all(|c| ACCESS_CODE_ALPHABET.contains(&c)) {
        let mut err = ValidationError::new("access_code_format");
        err.message = Some("Access code contains characters outside of its alphabet".into());
        return Err(err);
    }

    Ok(())
}

/// Rejects names made only of whitespace.
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("Value must not be blank".into());
        return Err(err);
    }
    Ok(())
}
