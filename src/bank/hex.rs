//! Hex text rules for register slot editing.
//!
//! While a slot is being edited its text is only sanitized (free-form hex,
//! no prefix required); on commit it is normalized to the canonical
//! `0x`-prefixed 4-digit uppercase form.

use crate::utils::error::ModbusError;

fn hex_digits(input: &str) -> String {
    let upper = input.trim().to_uppercase();
    let stripped = upper.strip_prefix("0X").unwrap_or(&upper);
    stripped.chars().filter(|c| c.is_ascii_hexdigit()).collect()
}

/// Advisory in-edit cleanup: strip the `0x` prefix and non-hex characters,
/// truncate past 4 digits, uppercase. Never rejects input.
pub fn sanitize_hex_text(input: &str) -> String {
    let mut digits = hex_digits(input);
    digits.truncate(4);
    digits
}

/// Commit-time normalization: empty text becomes `0x0000`, anything else is
/// zero-padded (or truncated) to 4 digits and given the `0x` prefix.
pub fn normalize_hex_text(input: &str) -> String {
    let digits = sanitize_hex_text(input);
    format!("0x{:0>4}", digits)
}

/// Parse committed slot text into a register value. Accepts an optional
/// `0x` prefix; requires exactly 4 hex digits after sanitation.
pub fn parse_hex_text(input: &str) -> Result<u16, ModbusError> {
    let digits = hex_digits(input);
    if digits.len() != 4 {
        return Err(ModbusError::InvalidInput(format!(
            "Invalid hex value: {}. Please enter 4-digit hex values (0000-FFFF)",
            input.trim()
        )));
    }
    u16::from_str_radix(&digits, 16).map_err(|_| {
        ModbusError::InvalidInput(format!("Invalid hex value: {}", input.trim()))
    })
}
