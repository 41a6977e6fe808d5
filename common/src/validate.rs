use once_cell::sync::Lazy;
use regex::Regex;

/// 32-byte Curve25519 key, standard base64, final bit-group forced to one of
/// the values a clamped private key's derived public key can actually take.
static PUBLIC_KEY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9+/]{42}[AEIMQUYcgkosw480]=$").unwrap());

/// Returns `true` iff `s` is syntactically a valid WireGuard public key.
///
/// This is a syntax check only; it does not verify the key is on-curve or
/// belongs to any particular peer.
pub fn is_valid_public_key(s: &str) -> bool {
    PUBLIC_KEY_REGEX.is_match(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_real_looking_key() {
        assert!(is_valid_public_key(
            "o52Ge+Rpj4CUSitVag9mS7pSXUesNM0ESnvj/wwehkg="
        ));
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(!is_valid_public_key("dG9vc2hvcnQ="));
    }

    #[test]
    fn rejects_bad_final_bit_group() {
        assert!(!is_valid_public_key(
            "o52Ge+Rpj4CUSitVag9mS7pSXUesNM0ESnvj/wwehkZ="
        ));
    }

    #[test]
    fn rejects_missing_padding() {
        assert!(!is_valid_public_key(
            "o52Ge+Rpj4CUSitVag9mS7pSXUesNM0ESnvj/wwehkg"
        ));
    }
}
