use tracing::trace;

use crate::{
    statement_text, query_packet, CollectFlags, FieldRef, FunctionRef, Operation, ParseResult,
    QueryClassifier, SqlMode, TypeMask,
};

/// Default classifier: a statement tokenizer, not a SQL parser.
///
/// Recognizes the statement forms routers route on. Anything it cannot
/// recognize parses as `Invalid`, which callers treat as WRITE. Tables,
/// fields and functions are extracted on a best effort basis; a miss is
/// an empty answer, never a wrong one.
#[derive(Debug, Clone)]
pub struct StatementClassifier {
    sql_mode: SqlMode,
    server_version: u64,
}

impl Default for StatementClassifier {
    fn default() -> Self {
        StatementClassifier {
            sql_mode: SqlMode::Default,
            server_version: 0,
        }
    }
}

impl StatementClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn classify(&self, sql: &str) -> (ParseResult, TypeMask, Operation) {
        let words = leading_words(sql, 3);
        let first = words.first().map(String::as_str).unwrap_or("");
        let second = words.get(1).map(String::as_str).unwrap_or("");

        let (mask, operation) = match first {
            "SELECT" => (TypeMask::READ | variable_reads(sql), Operation::Select),
            "INSERT" | "REPLACE" => (TypeMask::WRITE, Operation::Insert),
            "UPDATE" => (TypeMask::WRITE, Operation::Update),
            "DELETE" => (TypeMask::WRITE, Operation::Delete),
            "LOAD" => {
                if words.get(2).map(String::as_str) == Some("LOCAL") {
                    (TypeMask::WRITE, Operation::LoadLocal)
                } else {
                    (TypeMask::WRITE, Operation::Load)
                }
            }
            "CREATE" => {
                let mut mask = TypeMask::WRITE;
                if second == "TEMPORARY" {
                    mask |= TypeMask::CREATE_TMP_TABLE;
                }
                (mask, Operation::Create)
            }
            "DROP" => {
                if second == "PREPARE" {
                    (TypeMask::DEALLOC_PREPARE, Operation::Undefined)
                } else {
                    (TypeMask::WRITE, Operation::Drop)
                }
            }
            "ALTER" => (TypeMask::WRITE, Operation::Alter),
            "TRUNCATE" => (TypeMask::WRITE, Operation::Truncate),
            "GRANT" => (TypeMask::WRITE, Operation::Grant),
            "REVOKE" => (TypeMask::WRITE, Operation::Revoke),
            "CALL" => (TypeMask::WRITE, Operation::Call),
            "EXPLAIN" | "DESCRIBE" | "DESC" => (TypeMask::READ, Operation::Explain),
            "SHOW" => match second {
                "DATABASES" | "SCHEMAS" => (TypeMask::SHOW_DATABASES, Operation::Show),
                "TABLES" => (TypeMask::SHOW_TABLES, Operation::Show),
                _ => (TypeMask::READ, Operation::Show),
            },
            "BEGIN" => (TypeMask::BEGIN_TRX, Operation::Undefined),
            "START" if second == "TRANSACTION" => (TypeMask::BEGIN_TRX, Operation::Undefined),
            "COMMIT" => (TypeMask::COMMIT, Operation::Undefined),
            "ROLLBACK" => (TypeMask::ROLLBACK, Operation::Undefined),
            "SET" => (set_statement_mask(sql), Operation::Undefined),
            "USE" => (TypeMask::SESSION_WRITE, Operation::ChangeDb),
            "PREPARE" => (TypeMask::PREPARE_NAMED_STMT, Operation::Undefined),
            "EXECUTE" => (TypeMask::EXEC_STMT, Operation::Execute),
            "DEALLOCATE" => (TypeMask::DEALLOC_PREPARE, Operation::Undefined),
            _ => return (ParseResult::Invalid, TypeMask::empty(), Operation::Undefined),
        };

        (ParseResult::Parsed, mask, operation)
    }

    fn table_refs(&self, sql: &str) -> Vec<(Option<String>, String)> {
        let words = leading_words(sql, 2);
        let first = words.first().map(String::as_str).unwrap_or("");
        let second = words.get(1).map(String::as_str).unwrap_or("");

        let mut lexer = Lexer::new(sql);
        match first {
            "SELECT" | "DELETE" => {
                if !lexer.skip_to_word("FROM") {
                    return Vec::new();
                }
            }
            "INSERT" | "REPLACE" => {
                if !lexer.skip_to_word("INTO") {
                    return Vec::new();
                }
            }
            "UPDATE" => {
                lexer.expect_word("UPDATE");
                lexer.accept_words(&["LOW_PRIORITY", "IGNORE"]);
            }
            "LOAD" => {
                if !lexer.skip_to_word("TABLE") {
                    return Vec::new();
                }
            }
            "CREATE" | "DROP" | "ALTER" | "TRUNCATE" => {
                if second == "PREPARE" || !lexer.skip_to_word("TABLE") {
                    return Vec::new();
                }
                lexer.accept_words(&["IF", "NOT", "EXISTS"]);
            }
            _ => return Vec::new(),
        }

        lexer.table_list()
    }
}

impl QueryClassifier for StatementClassifier {
    fn parse(&mut self, packet: &[u8], collect: CollectFlags) -> ParseResult {
        trace!("parse with collect {:?}", collect);
        let Ok(sql) = statement_text(packet) else {
            return ParseResult::Invalid;
        };
        self.classify(sql).0
    }

    fn type_mask(&mut self, packet: &[u8]) -> TypeMask {
        let Ok(sql) = statement_text(packet) else {
            return TypeMask::empty();
        };
        self.classify(sql).1
    }

    fn operation(&mut self, packet: &[u8]) -> Operation {
        let Ok(sql) = statement_text(packet) else {
            return Operation::Undefined;
        };
        self.classify(sql).2
    }

    fn tables(&mut self, packet: &[u8], qualified: bool) -> Vec<String> {
        let Ok(sql) = statement_text(packet) else {
            return Vec::new();
        };
        self.table_refs(sql)
            .into_iter()
            .map(|(db, table)| match (qualified, db) {
                (true, Some(db)) => format!("{}.{}", db, table),
                _ => table,
            })
            .collect()
    }

    fn databases(&mut self, packet: &[u8]) -> Vec<String> {
        let Ok(sql) = statement_text(packet) else {
            return Vec::new();
        };
        let mut databases: Vec<String> = self
            .table_refs(sql)
            .into_iter()
            .filter_map(|(db, _)| db)
            .collect();
        databases.dedup();
        databases
    }

    fn fields(&mut self, packet: &[u8]) -> Vec<FieldRef> {
        let Ok(sql) = statement_text(packet) else {
            return Vec::new();
        };
        select_list_fields(sql)
    }

    fn functions(&mut self, packet: &[u8]) -> Vec<FunctionRef> {
        let Ok(sql) = statement_text(packet) else {
            return Vec::new();
        };
        select_list_functions(sql)
    }

    fn canonical(&mut self, packet: &[u8]) -> String {
        match statement_text(packet) {
            Ok(sql) => crate::canonicalize(sql),
            Err(_) => String::new(),
        }
    }

    fn has_where_or_using_clause(&mut self, packet: &[u8]) -> bool {
        let Ok(sql) = statement_text(packet) else {
            return false;
        };
        let mut lexer = Lexer::new(sql);
        while let Some(token) = lexer.next_token() {
            if let Token::Word(word) = token {
                if word.eq_ignore_ascii_case("WHERE") || word.eq_ignore_ascii_case("USING") {
                    return true;
                }
            }
        }
        false
    }

    fn prepare_name(&mut self, packet: &[u8]) -> Option<String> {
        let sql = statement_text(packet).ok()?;
        let mut lexer = Lexer::new(sql);
        if !lexer.expect_word("PREPARE") {
            return None;
        }
        match lexer.next_token()? {
            Token::Word(name) => Some(name.to_string()),
            Token::Quoted(name) => Some(name),
            _ => None,
        }
    }

    fn preparable_statement(&mut self, packet: &[u8]) -> Option<Vec<u8>> {
        let sql = statement_text(packet).ok()?;
        let mut lexer = Lexer::new(sql);
        if !lexer.expect_word("PREPARE") {
            return None;
        }
        lexer.next_token()?; // statement name
        if !lexer.expect_word("FROM") {
            return None;
        }
        match lexer.next_token()? {
            Token::StringLiteral(inner) => Some(query_packet(&inner)),
            _ => None,
        }
    }

    fn created_table_name(&mut self, packet: &[u8]) -> Option<String> {
        let sql = statement_text(packet).ok()?;
        if self.classify(sql).2 != Operation::Create {
            return None;
        }
        self.table_refs(sql).into_iter().next().map(|(db, table)| match db {
            Some(db) => format!("{}.{}", db, table),
            None => table,
        })
    }

    fn is_drop_table(&mut self, packet: &[u8]) -> bool {
        let Ok(sql) = statement_text(packet) else {
            return false;
        };
        let words = leading_words(sql, 2);
        words.first().map(String::as_str) == Some("DROP")
            && words.get(1).map(String::as_str) == Some("TABLE")
    }

    fn set_sql_mode(&mut self, mode: SqlMode) {
        self.sql_mode = mode;
    }

    fn sql_mode(&self) -> SqlMode {
        self.sql_mode
    }

    fn set_server_version(&mut self, version: u64) {
        self.server_version = version;
    }

    fn server_version(&self) -> u64 {
        self.server_version
    }
}

/// First `limit` keywords of the statement, uppercased.
fn leading_words(sql: &str, limit: usize) -> Vec<String> {
    let mut lexer = Lexer::new(sql);
    let mut words = Vec::new();
    while words.len() < limit {
        match lexer.next_token() {
            Some(Token::Word(word)) => words.push(word.to_ascii_uppercase()),
            Some(_) => break,
            None => break,
        }
    }
    words
}

fn variable_reads(sql: &str) -> TypeMask {
    let lower = sql.to_ascii_lowercase();
    let mut mask = TypeMask::empty();
    if lower.contains("@@global.") {
        mask |= TypeMask::GSYSVAR_READ;
    }
    if lower.contains("@@") {
        mask |= TypeMask::SYSVAR_READ;
    } else if lower.contains('@') {
        mask |= TypeMask::USERVAR_READ;
    }
    mask
}

fn set_statement_mask(sql: &str) -> TypeMask {
    let lower: String = sql.to_ascii_lowercase().split_whitespace().collect::<Vec<_>>().join(" ");
    if lower.contains("autocommit=1") || lower.contains("autocommit = 1") {
        return TypeMask::ENABLE_AUTOCOMMIT | TypeMask::SESSION_WRITE;
    }
    if lower.contains("autocommit=0") || lower.contains("autocommit = 0") {
        return TypeMask::DISABLE_AUTOCOMMIT | TypeMask::SESSION_WRITE;
    }
    if lower.contains("@@global.") || lower.starts_with("set global") {
        return TypeMask::GSYSVAR_WRITE | TypeMask::SESSION_WRITE;
    }
    if lower.contains('@') && !lower.contains("@@") {
        return TypeMask::USERVAR_WRITE | TypeMask::SESSION_WRITE;
    }
    TypeMask::SESSION_WRITE
}

/// Bare column references of the select list (between SELECT and FROM).
fn select_list_fields(sql: &str) -> Vec<FieldRef> {
    let Some(list) = select_list(sql) else {
        return Vec::new();
    };
    let mut lexer = Lexer::new(list);
    let mut fields = Vec::new();

    while let Some(token) = lexer.next_token() {
        let name = match token {
            // variables are not column references
            Token::Word(word) if !is_keyword(word) && !word.starts_with('@') => word.to_string(),
            Token::Quoted(name) => name,
            _ => continue,
        };
        // function call, handled by select_list_functions
        if lexer.peek_symbol(b'(') {
            lexer.skip_parens();
            continue;
        }
        let mut parts = vec![name];
        while lexer.accept_symbol(b'.') {
            match lexer.next_token() {
                Some(Token::Word(word)) => parts.push(word.to_string()),
                Some(Token::Quoted(name)) => parts.push(name),
                Some(Token::Symbol(b'*')) => parts.push("*".to_string()),
                _ => break,
            }
        }
        let field = match parts.len() {
            1 => FieldRef { db: None, table: None, column: parts.remove(0) },
            2 => FieldRef {
                db: None,
                table: Some(parts.remove(0)),
                column: parts.remove(0),
            },
            _ => FieldRef {
                db: Some(parts.remove(0)),
                table: Some(parts.remove(0)),
                column: parts.remove(0),
            },
        };
        fields.push(field);
    }
    fields
}

fn select_list_functions(sql: &str) -> Vec<FunctionRef> {
    let Some(list) = select_list(sql) else {
        return Vec::new();
    };
    let mut lexer = Lexer::new(list);
    let mut functions = Vec::new();

    while let Some(token) = lexer.next_token() {
        let Token::Word(word) = token else { continue };
        if !lexer.peek_symbol(b'(') {
            continue;
        }
        let args = lexer.parens_content();
        let fields = select_list_fields(&format!("SELECT {} FROM x", args));
        functions.push(FunctionRef {
            name: word.to_ascii_uppercase(),
            fields,
        });
    }
    functions
}

fn select_list(sql: &str) -> Option<&str> {
    let trimmed = sql.trim_start();
    let head = trimmed.get(..6)?;
    if !head.eq_ignore_ascii_case("select") {
        return None;
    }
    let body = &trimmed[6..];
    let mut lexer = Lexer::new(body);
    let end = lexer.position_of_word("FROM").unwrap_or(body.len());
    Some(&body[..end])
}

fn is_keyword(word: &str) -> bool {
    const KEYWORDS: &[&str] = &[
        "AS", "DISTINCT", "ALL", "FROM", "WHERE", "AND", "OR", "NOT", "NULL", "CASE", "WHEN",
        "THEN", "ELSE", "END", "IN", "IS", "LIKE", "BETWEEN",
    ];
    KEYWORDS.iter().any(|k| word.eq_ignore_ascii_case(k))
}

enum Token<'a> {
    Word(&'a str),
    Quoted(String),
    StringLiteral(String),
    Number,
    Symbol(u8),
}

struct Lexer<'a> {
    bytes: &'a [u8],
    text: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Lexer {
            bytes: text.as_bytes(),
            text,
            pos: 0,
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn next_token(&mut self) -> Option<Token<'a>> {
        self.skip_ws();
        let c = *self.bytes.get(self.pos)?;
        match c {
            b'`' | b'"' => {
                self.pos += 1;
                let mut out = String::new();
                while self.pos < self.bytes.len() {
                    let b = self.bytes[self.pos];
                    if b == c {
                        if self.bytes.get(self.pos + 1) == Some(&c) {
                            out.push(c as char);
                            self.pos += 2;
                            continue;
                        }
                        self.pos += 1;
                        return Some(Token::Quoted(out));
                    }
                    out.push(b as char);
                    self.pos += 1;
                }
                Some(Token::Quoted(out))
            }
            b'\'' => {
                self.pos += 1;
                let mut out = String::new();
                while self.pos < self.bytes.len() {
                    let b = self.bytes[self.pos];
                    if b == b'\\' {
                        if let Some(&escaped) = self.bytes.get(self.pos + 1) {
                            out.push(escaped as char);
                            self.pos += 2;
                            continue;
                        }
                    }
                    if b == b'\'' {
                        if self.bytes.get(self.pos + 1) == Some(&b'\'') {
                            out.push('\'');
                            self.pos += 2;
                            continue;
                        }
                        self.pos += 1;
                        return Some(Token::StringLiteral(out));
                    }
                    out.push(b as char);
                    self.pos += 1;
                }
                Some(Token::StringLiteral(out))
            }
            b'0'..=b'9' => {
                while self
                    .bytes
                    .get(self.pos)
                    .map(|b| b.is_ascii_alphanumeric() || *b == b'.')
                    .unwrap_or(false)
                {
                    self.pos += 1;
                }
                Some(Token::Number)
            }
            c if c.is_ascii_alphabetic() || c == b'_' || c == b'@' => {
                let start = self.pos;
                while self
                    .bytes
                    .get(self.pos)
                    .map(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'@' || *b == b'$')
                    .unwrap_or(false)
                {
                    self.pos += 1;
                }
                Some(Token::Word(&self.text[start..self.pos]))
            }
            _ => {
                self.pos += 1;
                Some(Token::Symbol(c))
            }
        }
    }

    fn expect_word(&mut self, word: &str) -> bool {
        let saved = self.pos;
        match self.next_token() {
            Some(Token::Word(w)) if w.eq_ignore_ascii_case(word) => true,
            _ => {
                self.pos = saved;
                false
            }
        }
    }

    fn accept_words(&mut self, words: &[&str]) {
        loop {
            let mut matched = false;
            for word in words {
                if self.expect_word(word) {
                    matched = true;
                }
            }
            if !matched {
                return;
            }
        }
    }

    fn skip_to_word(&mut self, word: &str) -> bool {
        while let Some(token) = self.next_token() {
            if let Token::Word(w) = token {
                if w.eq_ignore_ascii_case(word) {
                    return true;
                }
            }
        }
        false
    }

    fn position_of_word(&mut self, word: &str) -> Option<usize> {
        loop {
            self.skip_ws();
            let at = self.pos;
            match self.next_token()? {
                Token::Word(w) if w.eq_ignore_ascii_case(word) => return Some(at),
                _ => {}
            }
        }
    }

    fn peek_symbol(&mut self, symbol: u8) -> bool {
        self.skip_ws();
        self.bytes.get(self.pos) == Some(&symbol)
    }

    fn accept_symbol(&mut self, symbol: u8) -> bool {
        if self.peek_symbol(symbol) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_parens(&mut self) {
        let _ = self.parens_content();
    }

    /// Consume a balanced paren group, returning its inside.
    fn parens_content(&mut self) -> String {
        if !self.accept_symbol(b'(') {
            return String::new();
        }
        let start = self.pos;
        let mut depth = 1usize;
        while self.pos < self.bytes.len() && depth > 0 {
            match self.bytes[self.pos] {
                b'(' => depth += 1,
                b')' => depth -= 1,
                _ => {}
            }
            self.pos += 1;
        }
        let end = if depth == 0 { self.pos - 1 } else { self.pos };
        self.text[start..end].to_string()
    }

    /// Comma separated table references, stopping at the first keyword
    /// that ends the list.
    fn table_list(&mut self) -> Vec<(Option<String>, String)> {
        let mut tables = Vec::new();
        loop {
            let first = match self.next_token() {
                Some(Token::Word(word)) if !is_list_terminator(word) => word.to_string(),
                Some(Token::Quoted(name)) => name,
                _ => break,
            };
            let entry = if self.accept_symbol(b'.') {
                match self.next_token() {
                    Some(Token::Word(word)) => (Some(first), word.to_string()),
                    Some(Token::Quoted(name)) => (Some(first), name),
                    _ => break,
                }
            } else {
                (None, first)
            };
            tables.push(entry);

            // skip an alias
            let saved = self.pos;
            match self.next_token() {
                Some(Token::Word(word)) if word.eq_ignore_ascii_case("AS") => {
                    let _ = self.next_token();
                }
                Some(Token::Word(word))
                    if !is_list_terminator(word) && !word.eq_ignore_ascii_case("JOIN") =>
                {
                    // bare alias
                }
                _ => self.pos = saved,
            }

            if !self.accept_symbol(b',') {
                break;
            }
        }
        tables
    }
}

fn is_list_terminator(word: &str) -> bool {
    const TERMINATORS: &[&str] = &[
        "WHERE", "SET", "VALUES", "SELECT", "ON", "USING", "GROUP", "ORDER", "LIMIT", "HAVING",
        "JOIN", "INNER", "LEFT", "RIGHT", "CROSS", "STRAIGHT_JOIN", "PARTITION",
    ];
    TERMINATORS.iter().any(|t| word.eq_ignore_ascii_case(t))
}
