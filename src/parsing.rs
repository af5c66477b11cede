//! Text parsing and formatting utilities for the SKSTACK line protocol

use crate::error::Error;
use crate::Result;

/// Largest integer a 53-bit mantissa holds exactly
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Largest scan duration code the adaptor accepts
pub const MAX_SCAN_DURATION: u8 = 14;

fn is_hex_run(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// True if `s` is a 64-bit MAC address written as 16 hex digits
pub fn is_mac(s: &str) -> bool {
    s.len() == 16 && is_hex_run(s)
}

/// True if `s` is an IPv6 address written as eight colon-separated groups of
/// one to four hex digits (the uncompressed form the adaptor prints)
pub fn is_ipv6(s: &str) -> bool {
    let groups: Vec<&str> = s.split(':').collect();
    groups.len() == 8 && groups.iter().all(|g| g.len() <= 4 && is_hex_run(g))
}

/// True if `s` is a non-empty run of decimal digits
pub fn is_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// True if `line` is a PAN descriptor parameter: two spaces of indentation,
/// a key of letters, digits and spaces, a colon and a hex value
pub fn is_pandesc_param(line: &str) -> bool {
    let Some(rest) = line.strip_prefix("  ") else {
        return false;
    };
    let Some((key, value)) = rest.split_once(':') else {
        return false;
    };
    !key.is_empty()
        && key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b' ')
        && is_hex_run(value)
}

/// Format `n` as upper-case hex, zero-padded to `2 * bytes` digits
pub fn num2hex(n: u64, bytes: u8) -> Result<String> {
    if n > MAX_SAFE_INTEGER {
        return Err(Error::validation(format!(
            "the specified number is too large, {}",
            n
        )));
    }
    if !(1..=8).contains(&bytes) {
        return Err(Error::validation(format!("invalid size of bytes, {}", bytes)));
    }
    Ok(format!("{:0width$X}", n, width = usize::from(bytes) * 2))
}

/// Convert a scan time in milliseconds to the adaptor's duration code.
///
/// The adaptor scans each channel for `2^(code+1) * 10` ms, so the code is
/// `floor(log2(msec / 10)) - 1`, with inputs below 20 ms mapped to 0 and the
/// result clamped to [`MAX_SCAN_DURATION`].
pub fn msec2duration(msec: u64) -> u8 {
    let tenths = msec.max(20) / 10;
    let code = tenths.ilog2() - 1;
    u8::try_from(code)
        .unwrap_or(MAX_SCAN_DURATION)
        .min(MAX_SCAN_DURATION)
}

/// Convert a scan duration code back to milliseconds per channel
pub fn duration2msec(duration: u8) -> u64 {
    2u64.saturating_pow(u32::from(duration) + 1)
        .saturating_mul(10)
}

/// Decode a hex string to bytes
pub fn hex_decode(s: &str) -> Result<Vec<u8>> {
    hex::decode(s)
        .map_err(|e| Error::protocol(format!("Invalid hex string: {}", e)))
}

/// Encode bytes as an upper-case hex string
pub fn hex_encode(data: &[u8]) -> String {
    hex::encode_upper(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_mac() {
        assert!(is_mac("0123456789ABCDEF"));
        assert!(is_mac("0123456789abcdef"));
        assert!(!is_mac("0123456789ABCDE"));
        assert!(!is_mac("0123456789ABCDEF0"));
        assert!(!is_mac("0123456789ABCDEG"));
        assert!(!is_mac(""));
    }

    #[test]
    fn test_is_ipv6() {
        assert!(is_ipv6("FE80:0000:0000:0000:103A:BC45:6DEF:7890"));
        assert!(is_ipv6("FE80:0:0:0:103A:BC45:6DEF:7890"));
        assert!(is_ipv6("fe80:0:0:0:103a:bc45:6def:7890"));
        assert!(!is_ipv6("FE80::103A:BC45:6DEF:7890"));
        assert!(!is_ipv6("FE80:0000:0000:0000:103A:BC45:6DEF"));
        assert!(!is_ipv6("FE80:00000:0000:0000:103A:BC45:6DEF:7890"));
        assert!(!is_ipv6("FE80:0000:0000:0000:103A:BC45:6DEF:789G"));
    }

    #[test]
    fn test_is_number() {
        assert!(is_number("0"));
        assert!(is_number("3610"));
        assert!(!is_number(""));
        assert!(!is_number("12a"));
        assert!(!is_number(" 12"));
    }

    #[test]
    fn test_is_pandesc_param() {
        assert!(is_pandesc_param("  Channel:21"));
        assert!(is_pandesc_param("  Channel Page:09"));
        assert!(is_pandesc_param("  Addr:123ABC456DEF7890"));
        assert!(!is_pandesc_param("Channel:21"));
        assert!(!is_pandesc_param(" Channel:21"));
        assert!(!is_pandesc_param("  Channel:"));
        assert!(!is_pandesc_param("  :21"));
        assert!(!is_pandesc_param("  Channel:2G"));
        assert!(!is_pandesc_param("  Pan-ID:8888"));
    }

    #[test]
    fn test_num2hex_padding() {
        assert_eq!(num2hex(0, 1).unwrap(), "00");
        assert_eq!(num2hex(0x21, 1).unwrap(), "21");
        assert_eq!(num2hex(0xabc, 2).unwrap(), "0ABC");
        assert_eq!(num2hex(0xffff_ffff, 4).unwrap(), "FFFFFFFF");
        assert_eq!(num2hex(1, 8).unwrap(), "0000000000000001");
    }

    #[test]
    fn test_num2hex_does_not_truncate() {
        assert_eq!(num2hex(0x1234, 1).unwrap(), "1234");
    }

    #[test]
    fn test_num2hex_rejects_bad_input() {
        assert!(num2hex(1, 0).is_err());
        assert!(num2hex(1, 9).is_err());
        assert!(num2hex(MAX_SAFE_INTEGER, 8).is_ok());
        assert!(num2hex(MAX_SAFE_INTEGER + 1, 8).is_err());
    }

    #[test]
    fn test_msec2duration_low_inputs() {
        assert_eq!(msec2duration(0), 0);
        assert_eq!(msec2duration(1), 0);
        assert_eq!(msec2duration(20), 0);
        assert_eq!(msec2duration(39), 0);
        assert_eq!(msec2duration(40), 1);
    }

    #[test]
    fn test_msec2duration_known_values() {
        assert_eq!(msec2duration(1000), 5);
        assert_eq!(msec2duration(60_000), 11);
        assert_eq!(msec2duration(u64::MAX), MAX_SCAN_DURATION);
    }

    #[test]
    fn test_msec2duration_monotonic() {
        let mut last = 0;
        for msec in (0..400_000).step_by(97) {
            let code = msec2duration(msec);
            assert!(code >= last);
            assert!(code <= MAX_SCAN_DURATION);
            last = code;
        }
    }

    #[test]
    fn test_duration2msec() {
        assert_eq!(duration2msec(0), 20);
        assert_eq!(duration2msec(1), 40);
        assert_eq!(duration2msec(14), 327_680);
        for code in 0..=MAX_SCAN_DURATION {
            assert_eq!(msec2duration(duration2msec(code)), code);
        }
    }

    #[test]
    fn test_hex_encode_decode() {
        let bytes = vec![0xde, 0xad, 0xbe, 0xef];
        assert_eq!(hex_encode(&bytes), "DEADBEEF");
        assert_eq!(hex_decode("DEADBEEF").unwrap(), bytes);
        assert_eq!(hex_decode("deadbeef").unwrap(), bytes);
    }

    #[test]
    fn test_hex_decode_takes_token_as_is() {
        assert!(hex_decode("0xAB").is_err());
        assert_eq!(hex_decode("0A").unwrap(), vec![0x0A]);
    }

    #[test]
    fn test_hex_decode_odd_length() {
        assert!(hex_decode("abc").is_err());
    }

    #[test]
    fn test_hex_decode_invalid_char() {
        assert!(hex_decode("ghij").is_err());
        assert!(hex_decode("é1").is_err());
    }

    #[test]
    fn test_hex_decode_empty() {
        assert_eq!(hex_decode("").unwrap(), Vec::<u8>::new());
    }
}
