//! Table name extraction from statement based replication events.
//!
//! QUERY events carry no table map, so the affected tables have to be
//! recovered from the SQL text itself. This is a hand written tokenizer,
//! not a SQL parser: it recognizes the statement forms that change table
//! data and gives up on everything else. A missed table only degrades
//! observability; attributing a change to the wrong table is not
//! acceptable, so whenever the text does not match exactly, the whole
//! statement is reported as not tracked.

use tracing::debug;

/// One table referenced by a statement. `db` is empty when the statement
/// relies on the current schema of the QUERY event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub db: String,
    pub table: String,
}

impl TableRef {
    fn new(db: String, table: String) -> Self {
        TableRef { db, table }
    }
}

/// Bare identifiers that can never be table names in the positions we
/// parse. Guards against reading `UPDATE SET ...` as a table called SET.
const RESERVED: &[&str] = &["SET", "SELECT", "WHERE", "FROM", "INTO", "VALUES", "TABLE", "JOIN"];

/// Extract the tables a DML/DDL statement writes to. `None` means the
/// statement is not one we track (or did not parse cleanly).
pub fn parse_table_names(sql: &str) -> Option<Vec<TableRef>> {
    let mut t = Tokenizer::new(sql);

    // MySQL does not support multi-table INSERT or REPLACE
    if t.match_keyword("INSERT") {
        while t.match_any(&["LOW_PRIORITY", "DELAYED", "HIGH_PRIORITY", "IGNORE"]) {}
        if !t.match_keyword("INTO") {
            return None;
        }
        let table = t.table_name()?;
        debug!("insert/replace into {}.{}", table.db, table.table);
        return Some(vec![table]);
    }

    if t.match_keyword("REPLACE") {
        while t.match_any(&["LOW_PRIORITY", "DELAYED"]) {}
        t.match_keyword("INTO");
        let table = t.table_name()?;
        debug!("insert/replace into {}.{}", table.db, table.table);
        return Some(vec![table]);
    }

    // UPDATE and DELETE support comma separated table lists
    if t.match_keyword("UPDATE") {
        while t.match_any(&["LOW_PRIORITY", "IGNORE"]) {}
        return t.table_list();
    }

    if t.match_keyword("DELETE") {
        while t.match_any(&["LOW_PRIORITY", "QUICK", "IGNORE"]) {}
        if !t.match_keyword("FROM") {
            return None;
        }
        return t.table_list();
    }

    if t.match_keyword("LOAD") {
        if !t.match_keyword("DATA") {
            return None;
        }
        if !t.skip_to_keyword("INTO") {
            return None;
        }
        t.match_keyword("TABLE");
        let table = t.table_name()?;
        debug!("load data into {}.{}", table.db, table.table);
        return Some(vec![table]);
    }

    if t.match_keyword("CREATE") {
        t.match_keyword("TEMPORARY");
        if !t.match_keyword("TABLE") {
            return None;
        }
        if t.match_keyword("IF") && (!t.match_keyword("NOT") || !t.match_keyword("EXISTS")) {
            return None;
        }
        let table = t.table_name()?;
        debug!("create table {}.{}", table.db, table.table);
        return Some(vec![table]);
    }

    if t.match_keyword("DROP") {
        if !t.match_keyword("TABLE") {
            return None;
        }
        if t.match_keyword("IF") && !t.match_keyword("EXISTS") {
            return None;
        }
        return t.table_list();
    }

    None
}

struct Tokenizer<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(sql: &'a str) -> Self {
        Tokenizer {
            bytes: sql.as_bytes(),
            pos: 0,
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    /// Case insensitive keyword match with a word boundary check; only
    /// consumes on success.
    fn match_keyword(&mut self, keyword: &str) -> bool {
        self.skip_ws();
        let end = self.pos + keyword.len();
        if end > self.bytes.len() {
            return false;
        }
        if !self.bytes[self.pos..end].eq_ignore_ascii_case(keyword.as_bytes()) {
            return false;
        }
        if let Some(&next) = self.bytes.get(end) {
            if next.is_ascii_alphanumeric() || next == b'_' {
                return false;
            }
        }
        self.pos = end;
        true
    }

    fn match_any(&mut self, keywords: &[&str]) -> bool {
        keywords.iter().any(|k| self.match_keyword(k))
    }

    fn match_symbol(&mut self, symbol: u8) -> bool {
        self.skip_ws();
        if self.peek() == Some(symbol) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Advance until the keyword is found at a word boundary, stepping
    /// over quoted regions so that string literals cannot fake a match.
    fn skip_to_keyword(&mut self, keyword: &str) -> bool {
        loop {
            self.skip_ws();
            match self.peek() {
                None => return false,
                Some(q @ (b'\'' | b'"' | b'`')) => {
                    self.pos += 1;
                    if !self.skip_quoted(q) {
                        return false;
                    }
                }
                Some(_) => {
                    if self.match_keyword(keyword) {
                        return true;
                    }
                    // skip one word or symbol
                    if self
                        .peek()
                        .map(|c| c.is_ascii_alphanumeric() || c == b'_')
                        .unwrap_or(false)
                    {
                        while self
                            .peek()
                            .map(|c| c.is_ascii_alphanumeric() || c == b'_')
                            .unwrap_or(false)
                        {
                            self.pos += 1;
                        }
                    } else {
                        self.pos += 1;
                    }
                }
            }
        }
    }

    fn skip_quoted(&mut self, quote: u8) -> bool {
        while self.pos < self.bytes.len() {
            if self.bytes[self.pos] == quote {
                if self.bytes.get(self.pos + 1) == Some(&quote) {
                    self.pos += 2;
                    continue;
                }
                self.pos += 1;
                return true;
            }
            self.pos += 1;
        }
        false
    }

    /// A quoted identifier (backtick or double quote) with doubled-quote
    /// escaping, or a bare `[A-Za-z0-9_]+` word.
    fn identifier(&mut self) -> Option<String> {
        self.skip_ws();
        match self.peek() {
            Some(q @ (b'`' | b'"')) => {
                self.pos += 1;
                let mut out = Vec::new();
                while self.pos < self.bytes.len() {
                    let c = self.bytes[self.pos];
                    if c == q {
                        if self.bytes.get(self.pos + 1) == Some(&q) {
                            out.push(q);
                            self.pos += 2;
                            continue;
                        }
                        self.pos += 1;
                        if out.is_empty() {
                            return None;
                        }
                        return Some(String::from_utf8_lossy(&out).to_string());
                    }
                    out.push(c);
                    self.pos += 1;
                }
                // unterminated quote
                None
            }
            Some(c) if c.is_ascii_alphanumeric() || c == b'_' => {
                let start = self.pos;
                while self
                    .peek()
                    .map(|c| c.is_ascii_alphanumeric() || c == b'_')
                    .unwrap_or(false)
                {
                    self.pos += 1;
                }
                let word = String::from_utf8_lossy(&self.bytes[start..self.pos]).to_string();
                if RESERVED.iter().any(|r| word.eq_ignore_ascii_case(r)) {
                    self.pos = start;
                    return None;
                }
                Some(word)
            }
            _ => None,
        }
    }

    /// `ident` or `ident "." ident`; a lone identifier leaves the
    /// database empty for the caller to resolve.
    fn table_name(&mut self) -> Option<TableRef> {
        let first = self.identifier()?;
        if self.match_symbol(b'.') {
            let table = self.identifier()?;
            Some(TableRef::new(first, table))
        } else {
            Some(TableRef::new(String::new(), first))
        }
    }

    /// Comma separated table names. Any member failing to parse makes
    /// the whole statement untracked.
    fn table_list(&mut self) -> Option<Vec<TableRef>> {
        let mut tables = vec![self.table_name()?];
        while self.match_symbol(b',') {
            tables.push(self.table_name()?);
        }
        debug!("table list: {:?}", tables);
        Some(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(pairs: &[(&str, &str)]) -> Vec<TableRef> {
        pairs
            .iter()
            .map(|(d, t)| TableRef::new(d.to_string(), t.to_string()))
            .collect()
    }

    #[test]
    fn insert_forms() {
        assert_eq!(
            parse_table_names("INSERT INTO t1 VALUES (1)"),
            Some(refs(&[("", "t1")]))
        );
        assert_eq!(
            parse_table_names("insert low_priority ignore into db1.t1 set x=1"),
            Some(refs(&[("db1", "t1")]))
        );
        assert_eq!(
            parse_table_names("INSERT DELAYED INTO `a b`.`t``x` VALUES (1)"),
            Some(refs(&[("a b", "t`x")]))
        );
        // INSERT without INTO is left untracked
        assert_eq!(parse_table_names("INSERT t1 VALUES (1)"), None);
    }

    #[test]
    fn replace_forms() {
        assert_eq!(
            parse_table_names("REPLACE INTO t2 VALUES (1)"),
            Some(refs(&[("", "t2")]))
        );
        assert_eq!(
            parse_table_names("REPLACE LOW_PRIORITY t2 VALUES (1)"),
            Some(refs(&[("", "t2")]))
        );
    }

    #[test]
    fn update_multi_table() {
        assert_eq!(
            parse_table_names("UPDATE LOW_PRIORITY IGNORE a.t1, `b`.`t 2`, t3 SET x=1"),
            Some(refs(&[("a", "t1"), ("b", "t 2"), ("", "t3")]))
        );
    }

    #[test]
    fn delete_forms() {
        assert_eq!(
            parse_table_names("DELETE FROM t1 WHERE id = 1"),
            Some(refs(&[("", "t1")]))
        );
        assert_eq!(
            parse_table_names("DELETE QUICK IGNORE FROM a.t1, b.t2"),
            Some(refs(&[("a", "t1"), ("b", "t2")]))
        );
        assert_eq!(parse_table_names("DELETE t1"), None);
    }

    #[test]
    fn load_data() {
        assert_eq!(
            parse_table_names("LOAD DATA INFILE '/tmp/x.csv' INTO TABLE db9.t9"),
            Some(refs(&[("db9", "t9")]))
        );
        // INTO inside the quoted filename must not match
        assert_eq!(
            parse_table_names("LOAD DATA INFILE 'INTO trap' INTO TABLE t"),
            Some(refs(&[("", "t")]))
        );
        assert_eq!(parse_table_names("LOAD DATA INFILE '/tmp/x.csv'"), None);
    }

    #[test]
    fn create_and_drop() {
        assert_eq!(
            parse_table_names("CREATE TABLE db1.t1 (id INT)"),
            Some(refs(&[("db1", "t1")]))
        );
        assert_eq!(
            parse_table_names("CREATE TEMPORARY TABLE IF NOT EXISTS tmp1 (x INT)"),
            Some(refs(&[("", "tmp1")]))
        );
        assert_eq!(
            parse_table_names("DROP TABLE IF EXISTS t1, db2.t2"),
            Some(refs(&[("", "t1"), ("db2", "t2")]))
        );
        // CREATE INDEX and friends are not tracked
        assert_eq!(parse_table_names("CREATE INDEX i1 ON t1 (x)"), None);
    }

    #[test]
    fn untracked_statements() {
        assert_eq!(parse_table_names("SELECT * FROM t1"), None);
        assert_eq!(parse_table_names("BEGIN"), None);
        assert_eq!(parse_table_names("SET @x = 1"), None);
        assert_eq!(parse_table_names("GRANT ALL ON db.* TO 'u'"), None);
        assert_eq!(parse_table_names(""), None);
    }

    #[test]
    fn no_false_positive_on_malformed_lists() {
        // trailing comma must not silently succeed
        assert_eq!(parse_table_names("UPDATE t1, SET x=1"), None);
        // keyword where a table name is expected
        assert_eq!(parse_table_names("UPDATE SET x=1"), None);
        // unterminated quoted identifier
        assert_eq!(parse_table_names("DELETE FROM `broken"), None);
    }
}
