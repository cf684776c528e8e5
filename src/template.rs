//! `%(key)s` placeholder substitution for message bodies.

use std::collections::HashMap;

/// Replaces every `%(key)s` with its value. Unknown keys render as
/// `<Key NAME not found>` instead of failing.
#[must_use]
pub fn fill(template: &str, values: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("%(") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find(")s") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let key = &after[..end];
        match values.get(key) {
            Some(value) => out.push_str(value),
            None => {
                out.push_str("<Key ");
                out.push_str(key);
                out.push_str(" not found>");
            }
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_substitutes_and_marks_missing() {
        let values = HashMap::from([("user_name", "Alice".to_string())]);
        assert_eq!(
            fill("Hi %(user_name)s, go to %(confirm_url)s.", &values),
            "Hi Alice, go to <Key confirm_url not found>."
        );
    }

    #[test]
    fn test_fill_leaves_unterminated_placeholder() {
        let values = HashMap::new();
        assert_eq!(fill("100% done %(oops", &values), "100% done %(oops");
        assert_eq!(fill("", &values), "");
    }
}
