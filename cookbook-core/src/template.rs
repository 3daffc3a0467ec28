//! Template interpolation with input sanitization.
//!
//! A recipe template marks where user input goes with a placeholder such as
//! `{user_input}`. Input is sanitized before substitution: truncated, stripped
//! of tag-like markup, then escaped, always in that order. A template without
//! any recognized placeholder still receives the input, appended after a
//! single space.
//!
//! Braces that do not form a recognized placeholder are left in place and
//! reported, since templates may legitimately contain code samples.

use crate::error::AppError;
use crate::types::SanitizationPolicy;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Placeholders that receive the user's input
pub const RECOGNIZED_PLACEHOLDERS: &[&str] =
    &["user_input", "userInput", "input", "text", "content"];

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("Invalid placeholder regex")
});

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z!?][^<>]*>").expect("Invalid tag regex"));

/// Result of an interpolation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpolation {
    /// Final prompt text
    pub prompt: String,
    /// `{name}` tokens left in the template after substitution
    pub unreplaced: Vec<String>,
    /// Non-fatal diagnostics (truncation, skipped inputs)
    pub warnings: Vec<String>,
}

/// Missing and extra names from [`validate_placeholders`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderReport {
    /// In the template but not provided
    pub missing: Vec<String>,
    /// Provided but not in the template
    pub extra: Vec<String>,
}

impl PlaceholderReport {
    pub fn is_valid(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Build the final prompt for a single user input.
pub fn interpolate(
    template: &str,
    user_input: &str,
    policy: Option<&SanitizationPolicy>,
    guide: Option<&str>,
) -> Result<Interpolation, AppError> {
    if template.is_empty() {
        return Err(AppError::invalid_template("Template must be a non-empty string"));
    }

    let default_policy = SanitizationPolicy::default();
    let policy = policy.unwrap_or(&default_policy);
    let mut warnings = Vec::new();
    let sanitized = sanitize_with_warnings(user_input, policy, &mut warnings);

    let (mut prompt, replaced) = substitute(template, |name| {
        RECOGNIZED_PLACEHOLDERS
            .contains(&name)
            .then_some(sanitized.as_str())
    });

    if replaced == 0 {
        prompt.push(' ');
        prompt.push_str(&sanitized);
    }

    let unreplaced: Vec<String> = extract_placeholders(template)
        .into_iter()
        .filter(|name| !RECOGNIZED_PLACEHOLDERS.contains(&name.as_str()))
        .collect();
    if !unreplaced.is_empty() {
        tracing::debug!(?unreplaced, "template has unreplaced placeholders");
    }

    Ok(Interpolation {
        prompt: prepend_guide(prompt, guide),
        unreplaced,
        warnings,
    })
}

/// Interpolate arbitrary named inputs. Non-string values are skipped.
pub fn interpolate_multiple(
    template: &str,
    inputs: &BTreeMap<String, serde_json::Value>,
    policy: Option<&SanitizationPolicy>,
) -> Result<Interpolation, AppError> {
    if template.is_empty() {
        return Err(AppError::invalid_template("Template must be a non-empty string"));
    }

    let default_policy = SanitizationPolicy::default();
    let policy = policy.unwrap_or(&default_policy);
    let mut warnings = Vec::new();
    let mut values: BTreeMap<&str, String> = BTreeMap::new();

    for (key, value) in inputs {
        let Some(text) = value.as_str() else {
            tracing::warn!(key = %key, "skipping non-string template input");
            warnings.push(format!("Input '{}' is not a string and was skipped", key));
            continue;
        };
        values.insert(key.as_str(), sanitize_with_warnings(text, policy, &mut warnings));
    }

    let (prompt, _) = substitute(template, |name| values.get(name).map(String::as_str));

    let unreplaced: Vec<String> = extract_placeholders(template)
        .into_iter()
        .filter(|name| !values.contains_key(name.as_str()))
        .collect();
    if !unreplaced.is_empty() {
        tracing::debug!(?unreplaced, "template has unreplaced placeholders");
    }

    Ok(Interpolation {
        prompt,
        unreplaced,
        warnings,
    })
}

/// Unique placeholder names in order of first appearance.
pub fn extract_placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Compare a template's placeholders against the names a caller provides.
pub fn validate_placeholders(template: &str, provided: &[&str]) -> PlaceholderReport {
    let found = extract_placeholders(template);
    let missing = found
        .iter()
        .filter(|name| !provided.contains(&name.as_str()))
        .cloned()
        .collect();
    let extra = provided
        .iter()
        .filter(|name| !found.iter().any(|f| f == *name))
        .map(|name| name.to_string())
        .collect();
    PlaceholderReport { missing, extra }
}

/// Sanitize user input: truncate, strip tags, escape.
pub fn sanitize(input: &str, policy: &SanitizationPolicy) -> String {
    sanitize_with_warnings(input, policy, &mut Vec::new())
}

/// Prepend `trim(guide) + "\n\n"` when the guide has content.
pub fn prepend_guide(prompt: String, guide: Option<&str>) -> String {
    match guide.map(str::trim) {
        Some(guide) if !guide.is_empty() => format!("{}\n\n{}", guide, prompt),
        _ => prompt,
    }
}

fn sanitize_with_warnings(
    input: &str,
    policy: &SanitizationPolicy,
    warnings: &mut Vec<String>,
) -> String {
    let mut text: String = input.to_string();

    let chars = text.chars().count();
    if chars > policy.max_length {
        tracing::warn!(
            length = chars,
            max_length = policy.max_length,
            "input truncated"
        );
        warnings.push(format!(
            "Input truncated from {} to {} characters",
            chars, policy.max_length
        ));
        text = text.chars().take(policy.max_length).collect();
    }

    if !policy.allow_html {
        text = strip_tags(&text);
    }

    if policy.escape_special_chars {
        text = escape_special_chars(&text);
    }

    text
}

/// Replace `{name}` tokens in one pass. `lookup` returns the replacement for a
/// token, or `None` to leave it in place. Returns the output and the number of
/// tokens replaced.
fn substitute<'a, F>(template: &str, mut lookup: F) -> (String, usize)
where
    F: FnMut(&str) -> Option<&'a str>,
{
    let mut replaced = 0;
    let out = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| match lookup(&caps[1]) {
        Some(value) => {
            replaced += 1;
            value.to_string()
        }
        None => caps[0].to_string(),
    });
    (out.into_owned(), replaced)
}

/// Remove `<...>` substrings that look like markup.
fn strip_tags(text: &str) -> String {
    TAG.replace_all(text, "").into_owned()
}

fn escape_special_chars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    fn plain() -> SanitizationPolicy {
        SanitizationPolicy::default().with_escape_special_chars(false)
    }

    #[test]
    fn test_replaces_placeholder() {
        let out = interpolate("Summarize: {user_input}", "cat sat on mat", Some(&plain()), None)
            .unwrap();
        assert_eq!(out.prompt, "Summarize: cat sat on mat");
        assert!(out.unreplaced.is_empty());
    }

    #[test]
    fn test_appends_when_no_placeholder() {
        let out = interpolate("Translate to French", "Hello", Some(&plain()), None).unwrap();
        assert_eq!(out.prompt, "Translate to French Hello");
    }

    #[test]
    fn test_every_recognized_placeholder_is_replaced() {
        for name in RECOGNIZED_PLACEHOLDERS {
            let template = format!("A {{{0}}} B {{{0}}} C", name);
            let out = interpolate(&template, "x", Some(&plain()), None).unwrap();
            assert_eq!(out.prompt, "A x B x C");
            assert!(!out.prompt.contains(&format!("{{{}}}", name)));
        }

        let out = interpolate("{input} and {text}", "y", Some(&plain()), None).unwrap();
        assert_eq!(out.prompt, "y and y");
    }

    #[test]
    fn test_fallback_uses_sanitized_input() {
        let policy = SanitizationPolicy::default();
        let input = "say \"hi\"\n<b>now</b>";
        let out = interpolate("Reply to this", input, Some(&policy), None).unwrap();
        assert_eq!(out.prompt, format!("Reply to this {}", sanitize(input, &policy)));
        assert_eq!(out.prompt, "Reply to this say \\\"hi\\\"\\nnow");
    }

    #[test]
    fn test_inserted_input_is_not_substituted_again() {
        let out = interpolate("{user_input} / {text}", "{content}", Some(&plain()), None).unwrap();
        assert_eq!(out.prompt, "{content} / {content}");
    }

    #[test]
    fn test_guide_is_prepended() {
        let out = interpolate("Q: {input}", "why", Some(&plain()), Some("  Be brief.  ")).unwrap();
        assert_eq!(out.prompt, "Be brief.\n\nQ: why");
    }

    #[test]
    fn test_blank_guide_is_ignored() {
        let with = interpolate("Q: {input}", "why", Some(&plain()), Some(" \n\t ")).unwrap();
        let without = interpolate("Q: {input}", "why", Some(&plain()), None).unwrap();
        assert_eq!(with.prompt, without.prompt);
    }

    #[test]
    fn test_empty_template_is_rejected() {
        let err = interpolate("", "x", None, None).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidTemplate);
    }

    #[test]
    fn test_unreplaced_tokens_are_reported() {
        let out = interpolate(
            "Fix {language} code: {input} // fn main() {}",
            "x",
            Some(&plain()),
            None,
        )
        .unwrap();
        assert_eq!(out.unreplaced, vec!["language".to_string()]);
        assert!(out.prompt.contains("{language}"));
    }

    #[test]
    fn test_sanitize_order_truncates_before_stripping() {
        let policy = SanitizationPolicy::new().with_max_length(5);
        // Truncation cuts the tag open, so nothing is stripped afterwards
        assert_eq!(sanitize("ab<icd>", &policy), "ab<ic");
        assert_eq!(sanitize("ab<icd>", &plain()), "ab");
        let out = interpolate("{input}", "abcdefgh", Some(&policy), None).unwrap();
        assert_eq!(out.prompt, "abcde");
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_strip_tags_keeps_comparisons() {
        let policy = plain();
        assert_eq!(sanitize("<script>x</script>", &policy), "x");
        assert_eq!(sanitize("a < b and c > d", &policy), "a < b and c > d");
        assert_eq!(
            sanitize("<b>", &policy.clone().with_allow_html(true)),
            "<b>"
        );
    }

    #[test]
    fn test_escape_special_chars() {
        let policy = SanitizationPolicy::default();
        assert_eq!(sanitize("a\\b", &policy), "a\\\\b");
        assert_eq!(sanitize("it's", &policy), "it\\'s");
        assert_eq!(sanitize("a\tb\rc", &policy), "a\\tb\\rc");
    }

    #[test]
    fn test_interpolate_multiple_skips_non_strings() {
        let mut inputs = BTreeMap::new();
        inputs.insert("name".to_string(), json!("Ada"));
        inputs.insert("count".to_string(), json!(3));

        let out = interpolate_multiple("Hi {name}, you have {count} items", &inputs, Some(&plain()))
            .unwrap();
        assert_eq!(out.prompt, "Hi Ada, you have {count} items");
        assert_eq!(out.unreplaced, vec!["count".to_string()]);
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_extract_placeholders() {
        let names = extract_placeholders("{a} {b} {a} {1x} {} {{c}} {with space}");
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_validate_placeholders() {
        let report = validate_placeholders("{title} by {author}", &["title", "year"]);
        assert_eq!(report.missing, vec!["author".to_string()]);
        assert_eq!(report.extra, vec!["year".to_string()]);
        assert!(!report.is_valid());
        assert!(validate_placeholders("{title}", &["title"]).is_valid());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn plain() -> SanitizationPolicy {
        SanitizationPolicy::default().with_escape_special_chars(false)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_recognized_placeholder_always_replaced(
            prefix in "[^{}]{0,20}",
            suffix in "[^{}]{0,20}",
            name in prop::sample::select(RECOGNIZED_PLACEHOLDERS),
            repeat in 1usize..4,
            input in "[^{}]{0,40}",
        ) {
            let template = format!("{}{}", prefix, format!("{{{}}}{}", name, suffix).repeat(repeat));
            let out = interpolate(&template, &input, None, None).unwrap();

            for recognized in RECOGNIZED_PLACEHOLDERS {
                let token = format!("{{{}}}", recognized);
                prop_assert!(!out.prompt.contains(&token));
            }
            let expected = format!(
                "{}{}",
                prefix,
                format!("{}{}", sanitize(&input, &SanitizationPolicy::default()), suffix).repeat(repeat)
            );
            prop_assert_eq!(out.prompt, expected);
        }

        #[test]
        fn prop_fallback_appends_sanitized_input(
            template in "[^{}]{1,40}",
            input in any::<String>(),
        ) {
            let policy = SanitizationPolicy::default();
            let out = interpolate(&template, &input, Some(&policy), None).unwrap();
            prop_assert_eq!(out.prompt, format!("{} {}", template, sanitize(&input, &policy)));
        }

        #[test]
        fn prop_escaped_output_has_no_raw_control_chars(input in any::<String>()) {
            let out = sanitize(&input, &SanitizationPolicy::default());
            prop_assert!(!out.contains('\n'));
            prop_assert!(!out.contains('\r'));
            prop_assert!(!out.contains('\t'));
        }

        #[test]
        fn prop_truncation_bounds_length(input in any::<String>(), max_length in 0usize..64) {
            let policy = plain().with_allow_html(true).with_max_length(max_length);
            prop_assert!(sanitize(&input, &policy).chars().count() <= max_length);
        }

        #[test]
        fn prop_extracted_names_are_unique(template in "[a-z{} ]{0,60}") {
            let names = extract_placeholders(&template);
            let unique: std::collections::HashSet<&String> = names.iter().collect();
            prop_assert_eq!(names.len(), unique.len());
            for name in &names {
                let token = format!("{{{}}}", name);
                prop_assert!(template.contains(&token));
            }
        }
    }
}
