use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Replaces accented Latin letters with their base letters (`ő` -> `o`, `ß` -> `ss`).
pub fn strip_diacritics(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    for ch in input.nfd() {
        if is_combining_mark(ch) {
            continue;
        }
        match ch {
            'ß' => output.push_str("ss"),
            'ẞ' => output.push_str("SS"),
            'æ' => output.push_str("ae"),
            'Æ' => output.push_str("AE"),
            'œ' => output.push_str("oe"),
            'Œ' => output.push_str("OE"),
            'ø' => output.push('o'),
            'Ø' => output.push('O'),
            'đ' => output.push('d'),
            'Đ' => output.push('D'),
            'ł' => output.push('l'),
            'Ł' => output.push('L'),
            other => output.push(other),
        }
    }
    output
}

/// Lower-cases, strips diacritics and drops every non-alphanumeric character.
pub fn normalize_token(input: &str) -> String {
    strip_diacritics(input)
        .to_lowercase()
        .chars()
        .filter(|ch| ch.is_alphanumeric())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_diacritics() {
        assert_eq!(strip_diacritics("Aknagödör őrző"), "Aknagodor orzo");
        assert_eq!(strip_diacritics("Straße"), "Strasse");
    }

    #[test]
    fn test_normalize_token() {
        assert_eq!(normalize_token("Cell Reference"), "cellreference");
        assert_eq!(normalize_token("cell_reference"), "cellreference");
        assert_eq!(normalize_token("Cím (HU)"), "cimhu");
    }
}
