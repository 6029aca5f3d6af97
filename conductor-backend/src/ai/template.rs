//! Prompt template filling

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{(\w+)\}").expect("valid placeholder regex"));

/// Substitute `{name}` placeholders in one pass over the template.
///
/// Substituted values are never rescanned, so text that itself looks like a
/// placeholder (a user typing `{results}`) is kept as written. Placeholders
/// with no matching value are left untouched.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let key = &caps[1];
            values
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fills_every_placeholder() {
        let out = fill_template("Q: {prompt}\nA: {results}", &[("prompt", "price?"), ("results", "$64k")]);
        assert_eq!(out, "Q: price?\nA: $64k");
    }

    #[test]
    fn test_values_are_not_substituted_again() {
        let out = fill_template(
            "## Request\n{prompt}\n## Results\n{results}",
            &[("prompt", "Explain {results} and {catalogue}"), ("results", "BTC is $64k")],
        );
        assert_eq!(out, "## Request\nExplain {results} and {catalogue}\n## Results\nBTC is $64k");
    }

    #[test]
    fn test_unknown_placeholders_and_json_braces_kept() {
        let out = fill_template(r#"{missing} {"agents": ["x"]} {name}"#, &[("name", "ok")]);
        assert_eq!(out, r#"{missing} {"agents": ["x"]} ok"#);
    }
}
