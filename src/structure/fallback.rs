//! Line-bounded brace counting, used when the source does not parse.

/// Extract a method's text by finding its declaration line and following
/// braces until they balance. Returns `None` when no declaration is found.
pub fn extract_method(source: &str, method_name: &str) -> Option<String> {
    let mut lines = source.lines();
    let first = lines.by_ref().find(|line| declares(line, method_name))?;

    let mut method_lines = vec![first];
    let mut depth = brace_delta(first);
    let mut opened = first.contains('{');

    if !(opened && depth <= 0) {
        for line in lines {
            method_lines.push(line);
            depth += brace_delta(line);
            opened |= line.contains('{');
            if opened && depth <= 0 {
                break;
            }
        }
    }

    Some(method_lines.join("\n"))
}

fn brace_delta(line: &str) -> i64 {
    line.chars().fold(0, |acc, c| match c {
        '{' => acc + 1,
        '}' => acc - 1,
        _ => acc,
    })
}

/// A line declares `name` when it carries an access modifier and the name
/// appears as a whole identifier followed by `(`.
fn declares(line: &str, name: &str) -> bool {
    let has_modifier = ["public", "private", "protected"]
        .iter()
        .any(|m| line.contains(m));
    if !has_modifier || name.is_empty() {
        return false;
    }

    line.match_indices(name).any(|(idx, _)| {
        let before = line[..idx].chars().next_back();
        let after = line[idx + name.len()..].trim_start().chars().next();
        !before.is_some_and(is_ident_char) && after == Some('(')
    })
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    const BROKEN: &str = "public class X {\n    public void broken( {\n        int x = 1;\n    }\n\n    private int other() { return 2; }\n}\n";

    #[test]
    fn test_extracts_until_braces_balance() {
        let text = extract_method(BROKEN, "broken").unwrap();
        assert_eq!(text, "    public void broken( {\n        int x = 1;\n    }");
    }

    #[test]
    fn test_single_line_method() {
        let text = extract_method(BROKEN, "other").unwrap();
        assert_eq!(text, "    private int other() { return 2; }");
    }

    #[test]
    fn test_brace_on_next_line() {
        let source = "class Y {\n    public void run()\n    {\n        go();\n    }\n}";
        let text = extract_method(source, "run").unwrap();
        assert_eq!(text, "    public void run()\n    {\n        go();\n    }");
    }

    #[test]
    fn test_name_must_be_whole_identifier() {
        let source = "class Z {\n    public void runAll() {\n    }\n}";
        assert_eq!(extract_method(source, "run"), None);
    }

    #[test]
    fn test_missing_method() {
        assert_eq!(extract_method(BROKEN, "absent"), None);
    }
}
