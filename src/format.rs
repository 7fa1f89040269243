use regex::Regex;
use std::sync::OnceLock;

struct Patterns {
    line_break: Regex,
    bold: Regex,
    italic: Regex,
    link: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        line_break: Regex::new(r"(?i)<br\s*/?>").expect("static regex"),
        bold: Regex::new(r"\*\*(.*?)\*\*").expect("static regex"),
        italic: Regex::new(r"\*(.*?)\*").expect("static regex"),
        link: Regex::new(r"\[([^\]]+)\]\((https?://[^\s)]+)\)").expect("static regex"),
    })
}

/// Escapes `& " ' < >`, ampersand first so later entities are not re-escaped.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('\'', "&#039;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Turns raw message text into display markup.
///
/// Existing `<br>` tags survive escaping, newlines become `<br>`, and a small
/// markdown subset is rendered: `**bold**`, `*italic*` and `[label](http..)`
/// links which open in a new tab without opener access or referrer.
pub fn format_message(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let p = patterns();

    // Escape the text between existing line breaks, then rejoin with a canonical tag.
    let escaped = p
        .line_break
        .split(text)
        .map(escape_html)
        .collect::<Vec<_>>()
        .join("<br>");

    let with_breaks = escaped.replace('\n', "<br>");
    let bold = p.bold.replace_all(&with_breaks, "<strong>$1</strong>");
    let italic = p.italic.replace_all(&bold, "<em>$1</em>");
    p.link
        .replace_all(
            &italic,
            r#"<a href="$2" target="_blank" rel="noopener noreferrer">$1</a>"#,
        )
        .into_owned()
}
