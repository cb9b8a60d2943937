//! ANSI / control-code scrubbing for captured PTY output.
//!
//! Child assistant CLIs render spinners, colors and cursor movement; none of
//! that is useful to a supervising agent. Scrubbing removes CSI and OSC
//! sequences, charset selections, and C0 control characters other than
//! newline and tab, then collapses large runs of blank lines.

use once_cell::sync::Lazy;
use regex::Regex;

static CSI: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap());
// OSC sequences terminate with BEL or ST (ESC \)
static OSC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)?").unwrap());
static CHARSET: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b[()][0-9A-Za-z]").unwrap());
static STRAY_ESC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b[=>]?").unwrap());
static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

/// Remove terminal escape sequences and control characters from raw output.
pub fn clean(raw: &str) -> String {
    let text = CSI.replace_all(raw, "");
    let text = OSC.replace_all(&text, "");
    let text = CHARSET.replace_all(&text, "");
    let text = STRAY_ESC.replace_all(&text, "");

    let text: String = text
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    BLANK_RUNS.replace_all(&text, "\n\n\n").into_owned()
}

/// Return a character window over cleaned text.
///
/// With an `offset`, the slice starts there; otherwise the *last* `max_chars`
/// characters are returned (the most recent output is the most useful). A
/// `max_chars` of zero means unlimited.
pub fn window(text: &str, max_chars: usize, offset: Option<usize>) -> String {
    let chars: Vec<char> = text.chars().collect();
    match offset {
        Some(start) => {
            let start = start.min(chars.len());
            let end = if max_chars == 0 {
                chars.len()
            } else {
                (start + max_chars).min(chars.len())
            };
            chars[start..end].iter().collect()
        }
        None => {
            if max_chars == 0 || chars.len() <= max_chars {
                text.to_string()
            } else {
                chars[chars.len() - max_chars..].iter().collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_strips_csi_sequences() {
        let raw = "\x1b[1;32mgreen\x1b[0m plain \x1b[2K\x1b[1Gprompt";
        assert_eq!(clean(raw), "green plain prompt");
    }

    #[test]
    fn test_strips_osc_titles() {
        let raw = "\x1b]0;window title\x07visible\x1b]8;;http://x\x1b\\link";
        assert_eq!(clean(raw), "visiblelink");
    }

    #[test]
    fn test_keeps_newline_and_tab() {
        let raw = "a\tb\r\nc\x08d";
        assert_eq!(clean(raw), "a\tb\ncd");
    }

    #[test]
    fn test_collapses_blank_runs() {
        let raw = "top\n\n\n\n\n\n\nbottom";
        assert_eq!(clean(raw), "top\n\n\nbottom");
        // Three newlines are left alone
        assert_eq!(clean("a\n\n\nb"), "a\n\n\nb");
    }

    #[test]
    fn test_window_suffix() {
        assert_eq!(window("abcdefgh", 3, None), "fgh");
        assert_eq!(window("abc", 10, None), "abc");
        assert_eq!(window("abcdefgh", 0, None), "abcdefgh");
    }

    #[test]
    fn test_window_offset() {
        assert_eq!(window("abcdefgh", 3, Some(2)), "cde");
        assert_eq!(window("abcdefgh", 0, Some(5)), "fgh");
        assert_eq!(window("abc", 5, Some(10)), "");
    }
}
