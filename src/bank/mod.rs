pub mod hex;
pub mod registers;

pub use hex::{normalize_hex_text, parse_hex_text, sanitize_hex_text};
pub use registers::{RegisterBank, BANK_SIZE};
