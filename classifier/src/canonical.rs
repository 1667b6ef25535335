/// Rewrite a statement into its canonical form: every string and
/// numeric literal becomes `?`. Identifier quoting (backticks) is kept,
/// whitespace runs collapse to one space. The canonical form is the
/// classifier cache key, so it must be deterministic and cheap.
pub fn canonicalize(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'\'' | b'"' => {
                i = skip_string(bytes, i);
                out.push('?');
            }
            b'`' => {
                let end = skip_string(bytes, i);
                out.push_str(&sql[i..end]);
                i = end;
            }
            b'0'..=b'9' => {
                // a number literal, unless glued to an identifier
                if ends_with_ident_char(&out) {
                    out.push(c as char);
                    i += 1;
                } else {
                    i = skip_number(bytes, i);
                    out.push('?');
                }
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                // line comment runs to the end of the line
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            c if c.is_ascii_whitespace() => {
                if !out.ends_with(' ') && !out.is_empty() {
                    out.push(' ');
                }
                i += 1;
            }
            _ => {
                out.push(c as char);
                i += 1;
            }
        }
    }

    out.trim_end().to_string()
}

fn ends_with_ident_char(out: &str) -> bool {
    out.chars()
        .last()
        .map(|c| c.is_ascii_alphanumeric() || c == '_' || c == '?')
        .unwrap_or(false)
}

/// Past the closing quote, honoring doubled quotes and backslash
/// escapes.
fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == b'\\' && quote != b'`' {
            i += 2;
            continue;
        }
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_number(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'0'..=b'9' | b'.' | b'x' | b'X' | b'a'..=b'f' | b'A'..=b'F' => i += 1,
            b'e' | b'E' if bytes.get(i + 1).map(|c| c.is_ascii_digit() || *c == b'-').unwrap_or(false) => {
                i += 2
            }
            _ => break,
        }
    }
    i
}

#[cfg(test)]
mod tests {
    use super::canonicalize;

    #[test]
    fn string_literals_become_placeholders() {
        assert_eq!(
            canonicalize("SELECT * FROM t WHERE name = 'alice'"),
            "SELECT * FROM t WHERE name = ?"
        );
        assert_eq!(
            canonicalize("SELECT 'it''s' FROM t"),
            "SELECT ? FROM t"
        );
    }

    #[test]
    fn numbers_become_placeholders_but_identifiers_survive() {
        assert_eq!(
            canonicalize("SELECT c1 FROM t2 WHERE id = 42"),
            "SELECT c1 FROM t2 WHERE id = ?"
        );
        assert_eq!(
            canonicalize("INSERT INTO t VALUES (1, 2.5, 0xff)"),
            "INSERT INTO t VALUES (?, ?, ?)"
        );
    }

    #[test]
    fn backtick_identifiers_are_kept() {
        assert_eq!(
            canonicalize("UPDATE `my table` SET x = 'v'"),
            "UPDATE `my table` SET x = ?"
        );
    }

    #[test]
    fn whitespace_collapses() {
        assert_eq!(
            canonicalize("SELECT   1\n  FROM   t"),
            "SELECT ? FROM t"
        );
    }

    #[test]
    fn line_comments_are_dropped() {
        assert_eq!(
            canonicalize("SELECT 1 -- trailing note\nFROM t"),
            "SELECT ? FROM t"
        );
    }

    #[test]
    fn same_shape_same_canonical() {
        assert_eq!(
            canonicalize("SELECT * FROM t WHERE id = 1"),
            canonicalize("SELECT * FROM t WHERE id = 99999")
        );
    }
}
