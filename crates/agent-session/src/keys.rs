//! Key-name to terminal escape-sequence translation.
//!
//! Interactive TUIs (including the assistant CLI's own prompts) expect raw
//! terminal input. `translate` maps symbolic key names to the byte sequences
//! a terminal would emit; unknown names are passed through verbatim by the
//! caller.

use std::borrow::Cow;

/// Translate a symbolic key name into the bytes to write to the PTY.
///
/// Returns `None` when the name is not a known key, in which case the caller
/// should write the text verbatim. Matching is case-insensitive; `ctrl+a`
/// through `ctrl+z` map to the corresponding C0 control bytes.
pub fn translate(key: &str) -> Option<Cow<'static, [u8]>> {
    let name = key.trim().to_ascii_lowercase();

    let fixed: &'static [u8] = match name.as_str() {
        "up" | "arrow_up" => b"\x1b[A",
        "down" | "arrow_down" => b"\x1b[B",
        "right" | "arrow_right" => b"\x1b[C",
        "left" | "arrow_left" => b"\x1b[D",
        "enter" | "return" => b"\r",
        "esc" | "escape" => b"\x1b",
        "tab" => b"\t",
        "backspace" => b"\x7f",
        "delete" | "del" => b"\x1b[3~",
        "home" => b"\x1b[H",
        "end" => b"\x1b[F",
        "pageup" | "page_up" => b"\x1b[5~",
        "pagedown" | "page_down" => b"\x1b[6~",
        "space" => b" ",
        _ => {
            if let Some(letter) = name.strip_prefix("ctrl+") {
                let mut chars = letter.chars();
                if let (Some(c), None) = (chars.next(), chars.next()) {
                    if c.is_ascii_lowercase() {
                        let byte = (c as u8) - b'a' + 1;
                        return Some(Cow::Owned(vec![byte]));
                    }
                }
            }
            return None;
        }
    };

    Some(Cow::Borrowed(fixed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arrow_keys() {
        assert_eq!(translate("up").unwrap().as_ref(), b"\x1b[A");
        assert_eq!(translate("Down").unwrap().as_ref(), b"\x1b[B");
        assert_eq!(translate("LEFT").unwrap().as_ref(), b"\x1b[D");
        assert_eq!(translate("right").unwrap().as_ref(), b"\x1b[C");
    }

    #[test]
    fn test_editing_keys() {
        assert_eq!(translate("enter").unwrap().as_ref(), b"\r");
        assert_eq!(translate("esc").unwrap().as_ref(), b"\x1b");
        assert_eq!(translate("backspace").unwrap().as_ref(), b"\x7f");
        assert_eq!(translate("delete").unwrap().as_ref(), b"\x1b[3~");
        assert_eq!(translate("pageup").unwrap().as_ref(), b"\x1b[5~");
        assert_eq!(translate("space").unwrap().as_ref(), b" ");
    }

    #[test]
    fn test_ctrl_combinations() {
        assert_eq!(translate("ctrl+a").unwrap().as_ref(), &[0x01]);
        assert_eq!(translate("ctrl+c").unwrap().as_ref(), &[0x03]);
        assert_eq!(translate("ctrl+z").unwrap().as_ref(), &[0x1a]);
        assert!(translate("ctrl+1").is_none());
        assert!(translate("ctrl+ab").is_none());
    }

    #[test]
    fn test_unknown_keys_pass_through() {
        assert!(translate("hello").is_none());
        assert!(translate("f13").is_none());
    }
}
