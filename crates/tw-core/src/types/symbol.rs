//! Fixed-size symbol utilities.
//!
//! Price ticks and price-book slots store symbols as `[u8; SYMBOL_LEN]`,
//! null-padded. Unlike a lossy conversion, [`symbol_to_bytes`] refuses symbols
//! that would not survive the round trip, because two truncated symbols could
//! otherwise alias the same slot.

/// Length of the fixed symbol buffer.
pub const SYMBOL_LEN: usize = 10;

/// Encode a symbol into a fixed buffer, zero-filling the remainder.
///
/// Returns `None` if the symbol is empty, longer than `SYMBOL_LEN` bytes, or
/// contains a NUL byte.
#[inline]
pub fn symbol_to_bytes(s: &str) -> Option<[u8; SYMBOL_LEN]> {
    let bytes = s.as_bytes();
    if bytes.is_empty() || bytes.len() > SYMBOL_LEN || bytes.contains(&0) {
        return None;
    }
    let mut buf = [0u8; SYMBOL_LEN];
    buf[..bytes.len()].copy_from_slice(bytes);
    Some(buf)
}

/// Read a symbol from a fixed buffer, up to the first NUL.
///
/// Returns `""` for buffers that are not valid UTF-8.
#[inline]
pub fn symbol_from_bytes(buf: &[u8; SYMBOL_LEN]) -> &str {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(SYMBOL_LEN);
    std::str::from_utf8(&buf[..end]).unwrap_or("")
}

/// Check that every symbol is encodable and that none repeats.
pub fn validate_symbols(symbols: &[String]) -> Result<(), String> {
    if symbols.is_empty() {
        return Err("symbol list is empty".to_string());
    }
    for (i, sym) in symbols.iter().enumerate() {
        if symbol_to_bytes(sym).is_none() {
            return Err(format!("symbol '{sym}' must be 1..={SYMBOL_LEN} bytes without NUL"));
        }
        if symbols[..i].contains(sym) {
            return Err(format!("symbol '{sym}' is listed twice"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let buf = symbol_to_bytes("GOOGL").unwrap();
        assert_eq!(symbol_from_bytes(&buf), "GOOGL");
    }

    #[test]
    fn max_length_symbol() {
        let sym = "A".repeat(SYMBOL_LEN);
        let buf = symbol_to_bytes(&sym).unwrap();
        assert_eq!(symbol_from_bytes(&buf), sym);
    }

    #[test]
    fn rejects_unencodable() {
        assert!(symbol_to_bytes("").is_none());
        assert!(symbol_to_bytes(&"A".repeat(SYMBOL_LEN + 1)).is_none());
        assert!(symbol_to_bytes("AA\0PL").is_none());
    }

    #[test]
    fn validate_list() {
        let ok = vec!["AAPL".to_string(), "MSFT".to_string()];
        assert!(validate_symbols(&ok).is_ok());

        let dup = vec!["AAPL".to_string(), "AAPL".to_string()];
        assert!(validate_symbols(&dup).unwrap_err().contains("twice"));

        assert!(validate_symbols(&[]).is_err());
        assert!(validate_symbols(&["BERKSHIRE_B".to_string()]).is_err());
    }
}
