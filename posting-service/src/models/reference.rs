//! Structured payment reference codes (KID).
//!
//! A KID is 2-25 digits whose last digit is a MOD10 (Luhn) or MOD11 check
//! digit. MOD11 uses `-` as the check character when the remainder is 10.

/// Strip whitespace and separators, keep digits and the MOD11 `-` marker.
pub fn normalize_reference(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace() && *c != '.')
        .collect::<String>()
        .to_uppercase()
}

/// True when the code carries a valid MOD10 or MOD11 check digit.
pub fn is_valid_kid(code: &str) -> bool {
    let code = normalize_reference(code);
    if code.len() < 2 || code.len() > 25 {
        return false;
    }
    let (body, check) = code.split_at(code.len() - 1);
    if !body.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }

    let digits: Vec<u32> = body.chars().filter_map(|c| c.to_digit(10)).collect();
    match check {
        "-" => mod11_check(&digits) == Some('-'),
        _ => {
            let Some(check_char) = check.chars().next() else {
                return false;
            };
            check_char.is_ascii_digit()
                && (mod10_check(&digits) == check_char || mod11_check(&digits) == Some(check_char))
        }
    }
}

/// Exact comparison of two references after normalization.
pub fn references_match(a: &str, b: &str) -> bool {
    let a = normalize_reference(a);
    !a.is_empty() && a == normalize_reference(b)
}

fn mod10_check(digits: &[u32]) -> char {
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, d)| {
            if i % 2 == 0 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                *d
            }
        })
        .sum();
    let check = (10 - sum % 10) % 10;
    char::from_digit(check, 10).unwrap_or('0')
}

fn mod11_check(digits: &[u32]) -> Option<char> {
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, d)| d * (2 + (i as u32 % 6)))
        .sum();
    match 11 - sum % 11 {
        11 => Some('0'),
        10 => Some('-'),
        n => char::from_digit(n, 10),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_reference() {
        assert_eq!(normalize_reference(" 1234 5678 "), "12345678");
        assert_eq!(normalize_reference("12.34"), "1234");
    }

    #[test]
    fn test_mod10_kid() {
        // 7992739871 + Luhn check digit 3
        assert!(is_valid_kid("79927398713"));
        assert!(!is_valid_kid("79927398710"));
    }

    #[test]
    fn test_mod11_kid() {
        // 12345678 -> weights 2..7 from the right give sum 138, 138 % 11 = 6, check 5
        assert!(is_valid_kid("123456785"));
        assert!(!is_valid_kid("123456784"));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(!is_valid_kid(""));
        assert!(!is_valid_kid("1"));
        assert!(!is_valid_kid("12a45"));
    }

    #[test]
    fn test_references_match_exact_only() {
        assert!(references_match("1234 5678", "12345678"));
        assert!(!references_match("12345678", "12345679"));
        assert!(!references_match("", ""));
    }
}
