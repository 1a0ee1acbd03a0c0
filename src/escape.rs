use std::borrow::Cow;
use std::fmt::Write;

/// Rewrites non-printable characters of a message as backslash codes so that
/// every emitted message occupies exactly one output line.
///
/// A single final line break is kept as it is. Embedded line breaks become
/// `\n`, a literal backslash becomes `\\`, the usual control characters get
/// their C escapes (`\a \b \e \f \n \r \t \v`) and any other control byte,
/// DEL and C1 controls are written as three-digit octal per UTF-8 byte.
pub fn encode_backslash(text: &str) -> Cow<'_, str> {
    let (body, tail) = match text.strip_suffix('\n') {
        Some(body) => (body, "\n"),
        None => (text, ""),
    };
    if !body.chars().any(needs_escape) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 8);
    for c in body.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\x07' => out.push_str("\\a"),
            '\x08' => out.push_str("\\b"),
            '\x1b' => out.push_str("\\e"),
            '\x0c' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x0b' => out.push_str("\\v"),
            c if c.is_control() => {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    let _ = write!(out, "\\{byte:03o}");
                }
            }
            c => out.push(c),
        }
    }
    out.push_str(tail);
    Cow::Owned(out)
}

fn needs_escape(c: char) -> bool {
    c == '\\' || c.is_control()
}
