use std::borrow::Cow;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Marker appended to text cut short by [`truncate_to_width`].
const ELLIPSIS: &str = "...";
const ELLIPSIS_WIDTH: usize = 3;

/// Number of terminal columns `s` occupies.
///
/// CJK characters and most emoji count as two columns, combining marks as zero.
pub fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

/// Truncates `s` so it occupies at most `max_width` columns.
///
/// When text has to be cut, the last three columns become `...`. Widths too
/// narrow to hold a character plus the ellipsis get as many whole characters
/// as fit, with no ellipsis. Never splits a character.
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    if display_width(s) <= max_width {
        return Cow::Borrowed(s);
    }

    let budget = if max_width <= ELLIPSIS_WIDTH {
        max_width
    } else {
        max_width - ELLIPSIS_WIDTH
    };

    let mut used = 0;
    let mut cut = 0;
    for (idx, c) in s.char_indices() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        cut = idx + c.len_utf8();
    }

    if max_width <= ELLIPSIS_WIDTH {
        Cow::Owned(s[..cut].to_owned())
    } else {
        Cow::Owned(format!("{}{}", &s[..cut], ELLIPSIS))
    }
}

/// Fits `s` into a right-aligned column exactly `width` columns wide.
///
/// Long text is truncated with [`truncate_to_width`]; short text is padded
/// with spaces on the left.
pub fn fit_column(s: &str, width: usize) -> String {
    let text = truncate_to_width(s, width);
    let pad = width.saturating_sub(display_width(&text));
    let mut out = String::with_capacity(pad + text.len());
    out.extend(std::iter::repeat(' ').take(pad));
    out.push_str(&text);
    out
}

fn is_stripped_control(c: char) -> bool {
    c == '\x7f' || (c < ' ' && !matches!(c, '\t' | '\n' | '\r'))
}

/// Removes terminal control characters and ANSI escape sequences.
///
/// Feed titles end up in terminal listings, so CSI (`ESC [ ... final`) and
/// OSC (`ESC ] ... BEL` or `ESC ] ... ESC \`) sequences are dropped whole,
/// along with bare ESC, DEL and C0 controls other than tab, LF and CR.
///
/// Returns the input borrowed when there is nothing to strip.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped_control) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\x1b' {
            if !is_stripped_control(c) {
                out.push(c);
            }
            continue;
        }

        match chars.peek() {
            Some('[') => {
                chars.next();
                // Parameter and intermediate bytes run until a final byte in '@'..='~'.
                for n in chars.by_ref() {
                    if ('@'..='~').contains(&n) {
                        break;
                    }
                }
            }
            Some(']') => {
                chars.next();
                while let Some(n) = chars.next() {
                    if n == '\x07' {
                        break;
                    }
                    if n == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    Cow::Owned(out)
}
