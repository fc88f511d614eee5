//! Dimension handling for pipe diameters and materials.
//!
//! Diameters appear in ground truth both as plain numbers (`1.5`) and as
//! trade-size strings (`"2\""`, `"4-1/2\""`, `"3/4"`). Everything is
//! canonicalized to inches before comparison so the two forms are
//! interchangeable under the matcher's tolerance.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::Diameter;

/// Absolute tolerance, in inches, under which two diameters are considered
/// equal. An eighth of an inch covers rounding between trade sizes and
/// decimal forms.
pub const DEFAULT_DIAMETER_TOLERANCE: f64 = 0.125;

/// Grammar for dimension strings: a whole/decimal part, an optional
/// `-<num>/<den>` fractional remainder or a bare fraction, and an optional
/// inch suffix (`"`, `in`, `inch`, `inches`).
static DIMENSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?ix)^\s*
        (?:
            (?P<whole>\d+(?:\.\d+)?)
            (?:\s*-\s*(?P<num>\d+)\s*/\s*(?P<den>\d+))?
          |
            (?P<fnum>\d+)\s*/\s*(?P<fden>\d+)
        )
        \s*(?:"|in(?:ch(?:es)?)?)?\s*$"#,
    )
    .expect("dimension regex is valid")
});

/// Whether a string satisfies the dimension grammar.
pub fn is_valid_dimension(text: &str) -> bool {
    parse_dimension(text).is_some()
}

/// Parse a dimension string to inches.
///
/// `"1-1/2\""` → 1.5, `"3/4"` → 0.75, `"2 in"` → 2.0. Returns `None` when
/// the string doesn't fit the grammar (including zero denominators).
pub fn parse_dimension(text: &str) -> Option<f64> {
    let caps = DIMENSION_RE.captures(text)?;

    if let Some(whole) = caps.name("whole") {
        let mut value: f64 = whole.as_str().parse().ok()?;
        if let (Some(num), Some(den)) = (caps.name("num"), caps.name("den")) {
            let num: f64 = num.as_str().parse().ok()?;
            let den: f64 = den.as_str().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            value += num / den;
        }
        Some(value)
    } else {
        let num: f64 = caps.name("fnum")?.as_str().parse().ok()?;
        let den: f64 = caps.name("fden")?.as_str().parse().ok()?;
        if den == 0.0 {
            return None;
        }
        Some(num / den)
    }
}

/// Canonical inches value of a [`Diameter`], if it has one.
///
/// Numeric diameters must be finite and non-negative; text diameters must
/// satisfy the grammar.
pub fn diameter_inches(d: &Diameter) -> Option<f64> {
    match d {
        Diameter::Inches(n) if n.is_finite() && *n >= 0.0 => Some(*n),
        Diameter::Inches(_) => None,
        Diameter::Text(s) => parse_dimension(s),
    }
}

/// Whether two diameters agree within `tolerance` inches.
///
/// Diameters without a canonical value never match.
pub fn diameters_match(a: &Diameter, b: &Diameter, tolerance: f64) -> bool {
    match (diameter_inches(a), diameter_inches(b)) {
        (Some(a), Some(b)) => (a - b).abs() <= tolerance,
        _ => false,
    }
}

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").expect("valid regex"));
static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Normalize a material string for comparison: lowercase, hyphens become
/// spaces, punctuation stripped, whitespace collapsed.
pub fn normalize_material(material: &str) -> String {
    let lowered = material.to_lowercase();
    let dehyphenated = lowered.replace('-', " ");
    let stripped = NON_WORD.replace_all(&dehyphenated, "");
    MULTI_SPACE
        .replace_all(stripped.trim(), " ")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_inches() {
        assert_eq!(parse_dimension("2"), Some(2.0));
        assert_eq!(parse_dimension("2\""), Some(2.0));
        assert_eq!(parse_dimension("2 in"), Some(2.0));
        assert_eq!(parse_dimension("2 inch"), Some(2.0));
        assert_eq!(parse_dimension("2 inches"), Some(2.0));
    }

    #[test]
    fn parses_decimal() {
        assert_eq!(parse_dimension("1.5"), Some(1.5));
        assert_eq!(parse_dimension("0.75\""), Some(0.75));
    }

    #[test]
    fn parses_mixed_fraction() {
        assert_eq!(parse_dimension("4-1/2\""), Some(4.5));
        assert_eq!(parse_dimension("1-1/2"), Some(1.5));
        assert_eq!(parse_dimension("2 - 3/4"), Some(2.75));
    }

    #[test]
    fn parses_bare_fraction() {
        assert_eq!(parse_dimension("3/4"), Some(0.75));
        assert_eq!(parse_dimension("1/2\""), Some(0.5));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_dimension(""), None);
        assert_eq!(parse_dimension("big"), None);
        assert_eq!(parse_dimension("2-"), None);
        assert_eq!(parse_dimension("1/0"), None);
        assert_eq!(parse_dimension("two inches"), None);
    }

    #[test]
    fn diameter_numeric_vs_text_equal_under_tolerance() {
        let num = Diameter::Inches(2.0);
        let text = Diameter::Text("2\"".to_string());
        assert!(diameters_match(&num, &text, DEFAULT_DIAMETER_TOLERANCE));
    }

    #[test]
    fn diameter_four_and_a_half() {
        let d = Diameter::Text("4-1/2\"".to_string());
        assert_eq!(diameter_inches(&d), Some(4.5));
    }

    #[test]
    fn diameter_outside_tolerance() {
        let a = Diameter::Inches(2.0);
        let b = Diameter::Inches(2.25);
        assert!(!diameters_match(&a, &b, DEFAULT_DIAMETER_TOLERANCE));
        assert!(diameters_match(&a, &b, 0.25));
    }

    #[test]
    fn negative_numeric_has_no_canonical_value() {
        assert_eq!(diameter_inches(&Diameter::Inches(-1.0)), None);
        assert_eq!(diameter_inches(&Diameter::Inches(f64::NAN)), None);
    }

    #[test]
    fn material_normalization() {
        assert_eq!(normalize_material("Galvanized-Steel"), "galvanized steel");
        assert_eq!(normalize_material("  Cast   Iron. "), "cast iron");
        assert_eq!(normalize_material("CPVC"), "cpvc");
    }
}
