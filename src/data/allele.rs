use regex::Regex;
use std::sync::OnceLock;

fn separators() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-*:\s]+").unwrap())
}

/// Fold an allele name into the compact form used for artifact filenames:
/// uppercase, separators removed, species prefix dropped. `"HLA-A*02:01"`,
/// `"hla-a*02:01"` and `"A0201"` all map to `"A0201"`.
pub fn normalize_allele_name(raw: &str) -> String {
    let upper = raw.trim().to_ascii_uppercase();
    let compact = separators().replace_all(&upper, "");
    match compact.strip_prefix("HLA") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => compact.into_owned(),
    }
}

/// True when a normalized name is nothing but digits. Such names are the
/// footprint of a mangled identifier (a locus lost somewhere upstream) and
/// must never become an artifact filename.
pub fn is_numeric_token(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_star_colon_form() {
        assert_eq!(normalize_allele_name("HLA-A*02:01"), "A0201");
        assert_eq!(normalize_allele_name("hla-a*02:01"), "A0201");
        assert_eq!(normalize_allele_name("A0201"), "A0201");
    }

    #[test]
    fn normalizes_non_human_names() {
        assert_eq!(normalize_allele_name("H-2-Kb"), "H2KB");
        assert_eq!(normalize_allele_name("Mamu-A*01"), "MAMUA01");
    }

    #[test]
    fn keeps_bare_hla_intact() {
        // A pure prefix with nothing after it is left alone rather than
        // normalized to the empty string.
        assert_eq!(normalize_allele_name("HLA"), "HLA");
    }

    #[test]
    fn numeric_token_detection() {
        assert!(is_numeric_token("0201"));
        assert!(!is_numeric_token("A0201"));
        assert!(!is_numeric_token(""));
    }

    #[test]
    fn numeric_after_normalization() {
        // A name that lost its locus letter normalizes to digits only.
        assert!(is_numeric_token(&normalize_allele_name("02:01")));
    }
}
