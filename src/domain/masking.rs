//! Masking of identifying values before they enter a payload.
//!
//! Only the last [`VISIBLE_SUFFIX`] characters stay readable. Masking is
//! idempotent: a masked value passed through again comes back unchanged, so
//! the visible suffix never shrinks.

/// Character used to hide masked positions.
pub const MASK_CHAR: char = '*';

/// Number of trailing characters left visible.
pub const VISIBLE_SUFFIX: usize = 4;

/// Mask an opaque identifier, keeping its last four characters.
///
/// Values of four characters or fewer are masked entirely, since showing them
/// would reveal the whole identifier.
///
/// ```
/// use outbound_shield::domain::masking::mask_identifier;
///
/// assert_eq!(mask_identifier("cus_8f3a2b91"), "********2b91");
/// assert_eq!(mask_identifier("********2b91"), "********2b91");
/// assert_eq!(mask_identifier("abc"), "***");
/// ```
pub fn mask_identifier(value: &str) -> String {
    let len = value.chars().count();
    if len <= VISIBLE_SUFFIX {
        return MASK_CHAR.to_string().repeat(len);
    }

    let hidden = len - VISIBLE_SUFFIX;
    value
        .chars()
        .enumerate()
        .map(|(i, c)| if i < hidden { MASK_CHAR } else { c })
        .collect()
}

/// Mask a phone number, keeping only its last four digits.
///
/// Formatting characters are dropped first so `+1 (555) 010-4477` and
/// `15550104477` mask to the same value. A leading `+` is preserved.
///
/// ```
/// use outbound_shield::domain::masking::mask_phone;
///
/// assert_eq!(mask_phone("+1 (555) 010-4477"), "+*******4477");
/// assert_eq!(mask_phone("+*******4477"), "+*******4477");
/// ```
pub fn mask_phone(value: &str) -> String {
    let trimmed = value.trim();
    let (prefix, rest) = match trimmed.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", trimmed),
    };

    let digits: String = rest
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == MASK_CHAR)
        .collect();

    format!("{prefix}{}", mask_identifier(&digits))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_identifier_keeps_suffix() {
        assert_eq!(mask_identifier("1234567890"), "******7890");
    }

    #[test]
    fn test_mask_identifier_short_values_fully_hidden() {
        assert_eq!(mask_identifier(""), "");
        assert_eq!(mask_identifier("1234"), "****");
        assert_eq!(mask_identifier("12345"), "*2345");
    }

    #[test]
    fn test_mask_identifier_idempotent() {
        for value in ["a", "abcd", "abcdef", "user-42-xyz", "ÄÖÜäöüß"] {
            let once = mask_identifier(value);
            assert_eq!(mask_identifier(&once), once, "value {value:?}");
        }
    }

    #[test]
    fn test_mask_identifier_multibyte() {
        assert_eq!(mask_identifier("ÄÖÜäöüß"), "***äöüß");
    }

    #[test]
    fn test_mask_phone_strips_formatting() {
        assert_eq!(mask_phone("555-010-4477"), "******4477");
        assert_eq!(mask_phone("(555) 010 4477"), "******4477");
        assert_eq!(mask_phone("+44 20 7946 0958"), "+********0958");
    }

    #[test]
    fn test_mask_phone_idempotent() {
        let once = mask_phone("+1 (555) 010-4477");
        assert_eq!(mask_phone(&once), once);
    }
}
