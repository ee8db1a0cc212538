//! Raw Modbus command composition.
//!
//! The operator supplies whitespace-separated hex byte tokens (slave id,
//! function code, payload). The CRC is always computed and appended here;
//! operator input must never include one.

use crate::modbus::crc::crc16_modbus;
use crate::modbus::frame::{MAX_SLAVE_ID, MIN_SLAVE_ID};
use crate::utils::error::ModbusError;

pub const MIN_FUNCTION_CODE: u8 = 1;
pub const MAX_FUNCTION_CODE: u8 = 127;

/// Parse operator-supplied hex text into a complete frame with CRC.
///
/// Each token must be exactly two hex digits, case-insensitive. The first
/// byte is the slave id (1-247), the second the function code (1-127).
pub fn compose_raw(text: &str) -> Result<Vec<u8>, ModbusError> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() < 2 {
        return Err(ModbusError::TooShort);
    }

    for token in &tokens {
        if token.len() != 2 || !token.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ModbusError::MalformedByte((*token).to_string()));
        }
    }

    let mut frame = hex::decode(tokens.concat())
        .map_err(|e| ModbusError::InvalidInput(format!("Invalid hex input: {}", e)))?;

    let slave_id = frame[0];
    if slave_id < MIN_SLAVE_ID || slave_id > MAX_SLAVE_ID {
        return Err(ModbusError::OutOfRange(format!(
            "Invalid slave ID: {}. Must be {}-{}",
            slave_id, MIN_SLAVE_ID, MAX_SLAVE_ID
        )));
    }

    let function_code = frame[1];
    if function_code < MIN_FUNCTION_CODE || function_code > MAX_FUNCTION_CODE {
        return Err(ModbusError::OutOfRange(format!(
            "Invalid function code: {}. Must be {}-{}",
            function_code, MIN_FUNCTION_CODE, MAX_FUNCTION_CODE
        )));
    }

    let crc = crc16_modbus(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Advisory keystroke formatting for the raw input field: keep only hex
/// digits, regroup into byte pairs separated by single spaces, uppercase.
/// Never rejects input.
pub fn normalize_raw_input(text: &str) -> String {
    let digits: String = text
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect::<String>()
        .to_uppercase();

    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| std::str::from_utf8(pair).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_appends_crc() {
        let frame = compose_raw("01 03 00 00 00 06").unwrap();
        assert_eq!(&frame[..6], &[0x01, 0x03, 0x00, 0x00, 0x00, 0x06]);
        assert_eq!(frame.len(), 8);
        // CRC over the full frame including its CRC bytes is zero
        assert_eq!(crc16_modbus(&frame), 0x0000);
    }

    #[test]
    fn test_case_insensitive_tokens() {
        assert_eq!(compose_raw("01 ab").unwrap(), compose_raw("01 AB").unwrap());
    }

    #[test]
    fn test_single_token_too_short() {
        assert!(matches!(compose_raw("1"), Err(ModbusError::TooShort)));
        assert!(matches!(compose_raw(""), Err(ModbusError::TooShort)));
    }

    #[test]
    fn test_malformed_token_is_named() {
        match compose_raw("GG 03") {
            Err(ModbusError::MalformedByte(token)) => assert_eq!(token, "GG"),
            other => panic!("expected MalformedByte, got {:?}", other),
        }
        match compose_raw("01 0 03") {
            Err(ModbusError::MalformedByte(token)) => assert_eq!(token, "0"),
            other => panic!("expected MalformedByte, got {:?}", other),
        }
        assert!(matches!(
            compose_raw("010 3"),
            Err(ModbusError::MalformedByte(_))
        ));
    }

    #[test]
    fn test_slave_id_range() {
        assert!(matches!(
            compose_raw("00 03"),
            Err(ModbusError::OutOfRange(_))
        ));
        assert!(matches!(
            compose_raw("F8 03"),
            Err(ModbusError::OutOfRange(_))
        ));
        assert!(compose_raw("F7 03").is_ok());
    }

    #[test]
    fn test_function_code_range() {
        assert!(matches!(
            compose_raw("01 00"),
            Err(ModbusError::OutOfRange(_))
        ));
        assert!(matches!(
            compose_raw("01 80"),
            Err(ModbusError::OutOfRange(_))
        ));
        assert!(compose_raw("01 7F").is_ok());
    }

    #[test]
    fn test_normalize_raw_input() {
        assert_eq!(normalize_raw_input("01a2"), "01 A2");
        assert_eq!(normalize_raw_input("0 1 a 2"), "01 A2");
        assert_eq!(normalize_raw_input("zz01!03"), "01 03");
        assert_eq!(normalize_raw_input("abc"), "AB C");
        assert_eq!(normalize_raw_input(""), "");
    }
}
