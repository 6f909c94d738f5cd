//! Input validation for admin requests.

use once_cell::sync::Lazy;
use regex::Regex;

/// Four dot-separated octets in 0-255; leading zeros allowed.
static IPV4_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)$",
    )
    .unwrap_or_else(|_| unreachable!())
});

/// Check whether `input` is a dotted-quad IPv4 address.
///
/// IPv6 and every other address form are rejected.
#[must_use]
pub fn is_valid_ipv4(input: &str) -> bool {
    IPV4_REGEX.is_match(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("192.168.1.1" ; "private")]
    #[test_case("0.0.0.0" ; "zeros")]
    #[test_case("255.255.255.255" ; "broadcast")]
    #[test_case("010.001.000.009" ; "leading zeros")]
    #[test_case("203.0.113.5" ; "documentation range")]
    fn test_valid_ipv4(input: &str) {
        assert!(is_valid_ipv4(input));
    }

    #[test_case("" ; "empty")]
    #[test_case("256.1.1.1" ; "octet too large")]
    #[test_case("1.2.3" ; "three octets")]
    #[test_case("1.2.3.4.5" ; "five octets")]
    #[test_case("1.2.3.4 " ; "trailing space")]
    #[test_case("::1" ; "ipv6 loopback")]
    #[test_case("2001:db8::1" ; "ipv6")]
    #[test_case("localhost" ; "hostname")]
    #[test_case("1.2.3.4/24" ; "cidr")]
    #[test_case("0001.2.3.4" ; "four digit octet")]
    fn test_invalid_ipv4(input: &str) {
        assert!(!is_valid_ipv4(input));
    }
}
