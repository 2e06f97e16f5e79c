use alloy_primitives::{Address, U256};

/// Clean a hex string by removing "0x" prefix and whitespace
pub fn clean_hex(s: &str) -> &str {
    let s = s.trim();
    if let Some(stripped) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        stripped
    } else {
        s
    }
}

/// Convert a string (hex or decimal) to U256
pub fn to_u256(s: &str) -> Option<U256> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(hex) = s.strip_prefix("0x") {
        if hex.is_empty() {
            return Some(U256::ZERO);
        }
        return U256::from_str_radix(hex, 16).ok();
    }

    // z3 numeral printing
    if let Some(hex) = s.strip_prefix("#x") {
        return U256::from_str_radix(hex, 16).ok();
    }

    if let Some(bin) = s.strip_prefix("#b") {
        return U256::from_str_radix(bin, 2).ok();
    }

    if s.chars().all(|c| c.is_ascii_digit()) {
        return U256::from_str_radix(s, 10).ok();
    }

    None
}

/// Parse an address given either as hex (any length up to 20 bytes, left
/// padded) or as a decimal integer.
pub fn to_address(s: &str) -> Option<Address> {
    let value = to_u256(s)?;
    if value.bit_len() > 160 {
        return None;
    }
    Some(address_from_u256(value))
}

pub fn address_from_u256(value: U256) -> Address {
    let bytes = value.to_be_bytes::<32>();
    Address::from_slice(&bytes[12..])
}

pub fn address_to_u256(addr: Address) -> U256 {
    U256::from_be_slice(addr.as_slice())
}

/// Decode a hex blob, tolerating a "0x" prefix and an odd nibble count.
pub fn decode_bytes(s: &str) -> Option<Vec<u8>> {
    let cleaned = clean_hex(s);
    if cleaned.len() % 2 == 1 {
        return hex::decode(format!("0{cleaned}")).ok();
    }
    hex::decode(cleaned).ok()
}

/// "0x"-prefixed minimal hex rendering, the form the fuzzer writes.
pub fn u256_to_hex(value: U256) -> String {
    format!("{value:#x}")
}
