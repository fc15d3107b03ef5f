use serde::Serialize;

const READ_ONLY_COMMANDS: &[&str] = &["SELECT", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "PRAGMA"];
const WRITE_COMMANDS: &[&str] = &["INSERT", "UPDATE", "DELETE", "REPLACE"];
const DDL_COMMANDS: &[&str] = &["CREATE", "ALTER", "DROP", "TRUNCATE", "RENAME"];
const DANGEROUS_COMMANDS: &[&str] = &["DROP", "TRUNCATE", "DELETE", "ALTER"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueryAnalysis {
    pub command: String,
    pub is_read_only: bool,
    pub is_write: bool,
    pub is_ddl: bool,
    pub is_dangerous: bool,
    pub is_multi_statement: bool,
    pub estimated_risk: RiskLevel,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    /// Bare identifier or keyword, uppercased.
    Word,
    /// `"…"`, `` `…` `` or `[…]` identifier.
    QuotedIdent,
    /// `'…'` string literal.
    Literal,
    Number,
    Symbol,
}

#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Byte offset into the scanned text.
    pub start: usize,
    /// Parenthesis nesting depth at the token.
    pub depth: usize,
}

/// Lexical view of a query: tokens outside comments, with quoting respected.
#[derive(Debug, Default)]
pub(crate) struct Scan {
    pub tokens: Vec<Token>,
    pub has_line_comment: bool,
    pub has_block_comment: bool,
    /// Some token follows a `;`.
    pub has_multiple_statements: bool,
}

pub(crate) fn scan(sql: &str) -> Scan {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut out = Scan::default();
    let mut depth = 0usize;
    let mut seen_semicolon = false;
    let mut i = 0;

    while i < len {
        let c = bytes[i];
        let next = bytes.get(i + 1).copied();
        let start = i;

        let kind = match c {
            b'-' if next == Some(b'-') => {
                out.has_line_comment = true;
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'/' if next == Some(b'*') => {
                out.has_block_comment = true;
                i = match sql[i + 2..].find("*/") {
                    Some(pos) => i + 2 + pos + 2,
                    None => len,
                };
                continue;
            }
            b'\'' | b'"' | b'`' | b'[' => {
                let close = if c == b'[' { b']' } else { c };
                i += 1;
                while i < len {
                    if bytes[i] == close {
                        // doubled quote is an escape
                        if close != b']' && bytes.get(i + 1) == Some(&close) {
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    i += 1;
                }
                if c == b'\'' {
                    TokenKind::Literal
                } else {
                    TokenKind::QuotedIdent
                }
            }
            b';' => {
                seen_semicolon = true;
                i += 1;
                TokenKind::Symbol
            }
            b'(' => {
                depth += 1;
                i += 1;
                TokenKind::Symbol
            }
            b')' => {
                depth = depth.saturating_sub(1);
                i += 1;
                TokenKind::Symbol
            }
            c if c.is_ascii_whitespace() => {
                i += 1;
                continue;
            }
            c if c.is_ascii_digit() || (c == b'.' && next.is_some_and(|n| n.is_ascii_digit())) => {
                while i < len && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.') {
                    i += 1;
                }
                TokenKind::Number
            }
            c if c.is_ascii_alphabetic() || c == b'_' || c >= 0x80 => {
                while i < len
                    && (bytes[i].is_ascii_alphanumeric()
                        || bytes[i] == b'_'
                        || bytes[i] == b'$'
                        || bytes[i] >= 0x80)
                {
                    i += 1;
                }
                TokenKind::Word
            }
            _ => {
                i += 1;
                TokenKind::Symbol
            }
        };

        if seen_semicolon && !(kind == TokenKind::Symbol && c == b';') {
            out.has_multiple_statements = true;
        }

        let raw = &sql[start..i];
        let text = if kind == TokenKind::Word {
            raw.to_ascii_uppercase()
        } else {
            raw.to_string()
        };
        // Closing paren belongs to the outer level.
        let token_depth = if c == b'(' { depth - 1 } else { depth };
        out.tokens.push(Token {
            kind,
            text,
            start,
            depth: token_depth,
        });
    }

    out
}

impl Scan {
    fn is_word(&self, index: usize, word: &str) -> bool {
        self.tokens
            .get(index)
            .is_some_and(|t| t.kind == TokenKind::Word && t.text == word)
    }

    fn is_symbol(&self, index: usize, symbol: &str) -> bool {
        self.tokens
            .get(index)
            .is_some_and(|t| t.kind == TokenKind::Symbol && t.text == symbol)
    }

    pub fn first_command(&self) -> String {
        self.tokens
            .iter()
            .find(|t| !(t.kind == TokenKind::Symbol && t.text == ";"))
            .filter(|t| t.kind == TokenKind::Word)
            .map(|t| t.text.clone())
            .unwrap_or_default()
    }

    fn has_union_select(&self) -> bool {
        (0..self.tokens.len()).any(|i| {
            self.is_word(i, "UNION")
                && (self.is_word(i + 1, "SELECT")
                    || ((self.is_word(i + 1, "ALL") || self.is_word(i + 1, "DISTINCT"))
                        && self.is_word(i + 2, "SELECT")))
        })
    }

    /// `OR <lit> = <same lit>` or the `AND` form, `==` included.
    fn has_tautology(&self) -> bool {
        let literal = |t: &Token| matches!(t.kind, TokenKind::Number | TokenKind::Literal);
        (0..self.tokens.len()).any(|i| {
            if !(self.is_word(i, "OR") || self.is_word(i, "AND")) {
                return false;
            }
            let Some(left) = self.tokens.get(i + 1).filter(|t| literal(t)) else {
                return false;
            };
            if !self.is_symbol(i + 2, "=") {
                return false;
            }
            let right_index = if self.is_symbol(i + 3, "=") { i + 4 } else { i + 3 };
            self.tokens
                .get(right_index)
                .is_some_and(|right| right.kind == left.kind && right.text == left.text)
        })
    }

    /// End offset of the statement once trailing `;` tokens are dropped.
    fn body_end(&self, sql: &str) -> usize {
        let mut end = self.tokens.len();
        while end > 0 && self.is_symbol(end - 1, ";") {
            end -= 1;
        }
        match self.tokens.get(end) {
            Some(token) => token.start,
            None => sql.len(),
        }
    }

    /// Statement text with any trailing `;` removed.
    pub fn statement_body<'q>(&self, sql: &'q str) -> &'q str {
        sql[..self.body_end(sql)].trim_end()
    }

    /// Statement text with a top-level trailing `LIMIT n [OFFSET m | , m]`
    /// removed, so pagination can replace it.
    pub fn without_trailing_limit<'q>(&self, sql: &'q str) -> &'q str {
        let body = self.statement_body(sql);
        let mut end = self.tokens.len();
        while end > 0 && self.is_symbol(end - 1, ";") {
            end -= 1;
        }
        let tokens = &self.tokens[..end];

        let Some(limit_at) = tokens
            .iter()
            .rposition(|t| t.depth == 0 && t.kind == TokenKind::Word && t.text == "LIMIT")
        else {
            return body;
        };

        let tail = &tokens[limit_at + 1..];
        let number = |t: &Token| t.kind == TokenKind::Number;
        let is_limit_clause = match tail {
            [n] => number(n),
            [n, sep, m] => {
                number(n)
                    && number(m)
                    && ((sep.kind == TokenKind::Word && sep.text == "OFFSET")
                        || (sep.kind == TokenKind::Symbol && sep.text == ","))
            }
            _ => false,
        };

        if is_limit_clause {
            sql[..tokens[limit_at].start].trim_end()
        } else {
            body
        }
    }
}

/// Classifies a query by its first keyword and flags injection patterns.
pub fn analyze(query: &str) -> QueryAnalysis {
    let scan = scan(query);
    let command = scan.first_command();
    let is = |set: &[&str]| set.contains(&command.as_str());
    let (is_read_only, is_write, is_ddl, is_dangerous) = (
        is(READ_ONLY_COMMANDS),
        is(WRITE_COMMANDS),
        is(DDL_COMMANDS),
        is(DANGEROUS_COMMANDS),
    );

    let mut analysis = QueryAnalysis {
        command,
        is_read_only,
        is_write,
        is_ddl,
        is_dangerous,
        is_multi_statement: scan.has_multiple_statements,
        estimated_risk: RiskLevel::Low,
        warnings: Vec::new(),
    };

    if analysis.is_dangerous {
        analysis.estimated_risk = RiskLevel::High;
        analysis
            .warnings
            .push(format!("Dangerous command: {}", analysis.command));
    }

    if analysis.is_ddl {
        analysis.estimated_risk = analysis.estimated_risk.max(RiskLevel::Medium);
        analysis.warnings.push("Schema modification command".into());
    }

    if analysis.is_multi_statement {
        analysis.estimated_risk = RiskLevel::Critical;
        analysis.warnings.push("Multiple statements detected".into());
    }

    let patterns = [
        (scan.has_line_comment, "line comment"),
        (scan.has_block_comment, "block comment"),
        (scan.has_union_select(), "UNION SELECT"),
        (scan.has_tautology(), "tautological condition"),
    ];
    for (found, pattern) in patterns {
        if found {
            analysis.estimated_risk = RiskLevel::Critical;
            analysis
                .warnings
                .push(format!("Potential SQL injection pattern detected: {pattern}"));
        }
    }

    analysis
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_first_keyword() {
        let read = analyze("  select * from items");
        assert_eq!(read.command, "SELECT");
        assert!(read.is_read_only);
        assert_eq!(read.estimated_risk, RiskLevel::Low);
        assert!(read.warnings.is_empty());

        let ddl = analyze("CREATE TABLE t (a INTEGER)");
        assert!(ddl.is_ddl && !ddl.is_dangerous);
        assert_eq!(ddl.estimated_risk, RiskLevel::Medium);

        let drop = analyze("drop table t");
        assert!(drop.is_ddl && drop.is_dangerous);
        assert_eq!(drop.estimated_risk, RiskLevel::High);
        assert_eq!(drop.warnings[0], "Dangerous command: DROP");

        let delete = analyze("DELETE FROM t WHERE id = 3");
        assert!(delete.is_write && delete.is_dangerous);
        assert_eq!(delete.estimated_risk, RiskLevel::High);

        let update = analyze("UPDATE t SET a = 1");
        assert!(update.is_write && !update.is_dangerous);
        assert_eq!(update.estimated_risk, RiskLevel::Low);
    }

    #[test]
    fn stacked_statements_are_critical() {
        let analysis = analyze("SELECT * FROM t; DROP TABLE t;");
        assert!(analysis.is_multi_statement);
        assert_eq!(analysis.estimated_risk, RiskLevel::Critical);
        assert!(analysis
            .warnings
            .contains(&"Multiple statements detected".to_string()));
    }

    #[test]
    fn trailing_semicolons_are_a_single_statement() {
        let analysis = analyze("SELECT 1;  ;\n");
        assert!(!analysis.is_multi_statement);
        assert_eq!(analysis.estimated_risk, RiskLevel::Low);
    }

    #[test]
    fn comment_markers_inside_strings_are_ignored() {
        let analysis = analyze("SELECT '--not a comment; /* nor this */' AS x, \"a;b\" FROM t");
        assert!(!analysis.is_multi_statement);
        assert_eq!(analysis.estimated_risk, RiskLevel::Low);
        assert!(analysis.warnings.is_empty());
    }

    #[test]
    fn comments_are_critical() {
        assert_eq!(
            analyze("SELECT * FROM users WHERE name = 'x' -- and pw").estimated_risk,
            RiskLevel::Critical
        );
        assert_eq!(
            analyze("SELECT /* hint */ * FROM users").estimated_risk,
            RiskLevel::Critical
        );
        // The command is read past a leading comment.
        assert_eq!(analyze("/* x */ DELETE FROM t").command, "DELETE");
    }

    #[test]
    fn union_select_and_tautologies_are_critical() {
        for query in [
            "SELECT name FROM a UNION SELECT password FROM users",
            "SELECT name FROM a union all select password FROM users",
            "SELECT * FROM users WHERE name = '' OR 1=1",
            "SELECT * FROM users WHERE id = 2 AND 'x' == 'x'",
        ] {
            assert_eq!(analyze(query).estimated_risk, RiskLevel::Critical, "{query}");
        }

        assert_eq!(
            analyze("SELECT * FROM users WHERE a = 1 OR b = 1").estimated_risk,
            RiskLevel::Low
        );
        assert_eq!(
            analyze("SELECT * FROM users WHERE id = 1 OR 1 = 2").estimated_risk,
            RiskLevel::Low
        );
    }

    #[test]
    fn trailing_limit_is_removed_for_pagination() {
        let strip = |sql: &str| scan(sql).without_trailing_limit(sql).to_string();

        assert_eq!(strip("SELECT * FROM t LIMIT 5"), "SELECT * FROM t");
        assert_eq!(strip("SELECT * FROM t limit 5 offset 10;"), "SELECT * FROM t");
        assert_eq!(strip("SELECT * FROM t LIMIT 5, 10"), "SELECT * FROM t");
        assert_eq!(
            strip("SELECT * FROM (SELECT * FROM t LIMIT 2)"),
            "SELECT * FROM (SELECT * FROM t LIMIT 2)"
        );
        assert_eq!(strip("SELECT * FROM t;"), "SELECT * FROM t");
        assert_eq!(strip("SELECT 'LIMIT 3' AS l"), "SELECT 'LIMIT 3' AS l");
    }
}
