//! Per-record finding classification over free text.
//!
//! The remote system exposes no normalized finding code, so the verdict is read
//! out of reviewer text with an ordered keyword rule list. The first rule that
//! matches wins.

use std::sync::LazyLock;

use regex::Regex;

use cortap_shared::Finding;

/// Phrases that explicitly deny a deficiency. Checked before the deficiency keywords.
const NEGATED_DEFICIENCY: &[&str] = &["non-deficien", "non deficien", "not deficien", "no deficien"];

const DEFICIENCY: &[&str] = &["fail", "deficien", "non-complian", "noncomplian", "not complian"];

/// `not applicable` or a standalone `n/a`, never a slash inside a word like `design/approval`.
static NOT_APPLICABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bnot applicable\b|(?:^|[^a-z0-9])n/a(?:[^a-z0-9]|$)").expect("valid regex")
});

/// Classify one record from its coarse `status` and its reviewer text.
pub fn classify(status: Option<&str>, text: Option<&str>) -> Finding {
    if let Some(text) = text {
        let text = text.to_lowercase();
        let contains_any = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

        if contains_any(NEGATED_DEFICIENCY) {
            return Finding::NonDeficient;
        }
        if contains_any(DEFICIENCY) {
            return Finding::Deficient;
        }
        if NOT_APPLICABLE.is_match(&text) {
            return Finding::NotApplicable;
        }
    }

    match status.map(str::trim) {
        Some(s) if s.eq_ignore_ascii_case("not started") => Finding::NotApplicable,
        _ => Finding::NonDeficient,
    }
}

/// Resolve one finding for a group: any `D` wins, all-`NA` stays `NA`, else `ND`.
///
/// An empty group resolves to `NA`.
pub fn resolve<I>(findings: I) -> Finding
where
    I: IntoIterator<Item = Finding>,
{
    findings
        .into_iter()
        .max()
        .unwrap_or(Finding::NotApplicable)
}
