//! Read-only gate for model-generated SQL.
//!
//! This is an allow-list over a small lexer, not a parser. Anything the lexer
//! cannot confidently classify as a single pure read is rejected. The only way
//! to obtain a [`ValidatedStatement`] is through [`StatementValidator::validate`],
//! and the executor accepts nothing else.

use crate::domain::statement::{SqlCandidate, StatementKind};
use crate::errors::RejectReason;

const READ_VERBS: &[&str] = &["select", "with", "values", "table"];

const MUTATING_VERBS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "truncate", "grant", "revoke", "create",
    "merge", "copy", "comment", "vacuum", "analyze", "reindex", "cluster", "refresh", "lock",
    "call", "do", "execute", "prepare", "set", "reset", "discard", "import", "reassign",
    "security", "load", "notify",
];

/// Keywords rejected anywhere in an otherwise read-only statement: data
/// modifying CTEs, `SELECT ... INTO`, row locks.
const EMBEDDED_MUTATIONS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "truncate", "grant", "revoke", "create",
    "merge", "copy", "into", "execute", "call",
];

const SIDE_EFFECT_FUNCTIONS: &[&str] = &[
    "set_config",
    "nextval",
    "setval",
    "currval",
    "lastval",
    "query_to_xml",
    "query_to_xml_and_xmlschema",
    "query_to_xmlschema",
    "cursor_to_xml",
    "pg_notify",
    "txid_current",
    "pg_current_xact_id",
    "pg_export_snapshot",
];

const SIDE_EFFECT_PREFIXES: &[&str] = &[
    "dblink",
    "lo_",
    "pg_sleep",
    "pg_advisory",
    "pg_try_advisory",
    "pg_terminate",
    "pg_cancel",
    "pg_reload",
    "pg_rotate",
    "pg_switch",
    "pg_promote",
    "pg_create_",
    "pg_drop_",
    "pg_replication_",
    "pg_logical_",
    "pg_stat_reset",
    "pg_file_",
    "pg_read_",
    "pg_ls_",
    "pg_stat_file",
    "pg_import_",
];

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Word(String),
    QuotedIdent(String),
    Literal,
    Semicolon,
    OpenParen,
    Other,
}

/// A statement that passed validation. Only this module can build one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedStatement {
    sql: String,
}

impl ValidatedStatement {
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Accept(ValidatedStatement),
    Reject(RejectReason),
}

impl Verdict {
    pub fn into_result(self) -> Result<ValidatedStatement, RejectReason> {
        match self {
            Self::Accept(statement) => Ok(statement),
            Self::Reject(reason) => Err(reason),
        }
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept(_))
    }
}

#[derive(Clone, Debug, Default)]
pub struct StatementValidator;

impl StatementValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, candidate: &SqlCandidate) -> Verdict {
        match check(candidate) {
            Ok(()) => Verdict::Accept(ValidatedStatement { sql: candidate.sql.trim().to_string() }),
            Err(reason) => Verdict::Reject(reason),
        }
    }
}

fn check(candidate: &SqlCandidate) -> Result<(), RejectReason> {
    let tokens = tokenize(&candidate.sql)?;

    let mut statements =
        tokens.split(|token| *token == Token::Semicolon).filter(|segment| !segment.is_empty());
    let statement = statements.next().ok_or(RejectReason::EmptyStatement)?;
    if statements.next().is_some() {
        return Err(RejectReason::MultiStatementRejected);
    }

    if candidate.declared_kind != StatementKind::Query {
        return Err(RejectReason::disallowed(candidate.declared_kind.as_str()));
    }

    let verb = match statement.iter().find(|token| **token != Token::OpenParen) {
        Some(Token::Word(word)) => word.as_str(),
        _ => return Err(RejectReason::unrecognized("statement does not start with a keyword")),
    };
    if MUTATING_VERBS.contains(&verb) {
        return Err(RejectReason::disallowed(verb));
    }
    if !READ_VERBS.contains(&verb) {
        return Err(RejectReason::unrecognized(format!("`{verb}` is not a recognized read")));
    }

    scan_body(statement)
}

fn scan_body(statement: &[Token]) -> Result<(), RejectReason> {
    for (index, token) in statement.iter().enumerate() {
        let called = statement.get(index + 1) == Some(&Token::OpenParen);
        match token {
            Token::Word(word) if EMBEDDED_MUTATIONS.contains(&word.as_str()) => {
                return Err(RejectReason::disallowed(word.as_str()));
            }
            Token::Word(name) | Token::QuotedIdent(name) if called && is_side_effecting(name) => {
                return Err(RejectReason::disallowed(name.as_str()));
            }
            _ => {}
        }
    }
    Ok(())
}

fn is_side_effecting(function: &str) -> bool {
    SIDE_EFFECT_FUNCTIONS.contains(&function)
        || SIDE_EFFECT_PREFIXES.iter().any(|prefix| function.starts_with(prefix))
}

fn tokenize(sql: &str) -> Result<Vec<Token>, RejectReason> {
    let chars = sql.chars().collect::<Vec<_>>();
    let mut tokens = Vec::new();
    let mut index = 0;

    while let Some(&current) = chars.get(index) {
        let next = chars.get(index + 1).copied();

        if current.is_whitespace() {
            index += 1;
        } else if current == '-' && next == Some('-') {
            while chars.get(index).is_some_and(|ch| *ch != '\n') {
                index += 1;
            }
        } else if current == '/' && next == Some('*') {
            index = skip_block_comment(&chars, index)?;
        } else if current == '\'' {
            index = skip_quoted(&chars, index + 1, '\'', false)?;
            tokens.push(Token::Literal);
        } else if matches!(current, 'e' | 'E') && next == Some('\'') {
            index = skip_quoted(&chars, index + 2, '\'', true)?;
            tokens.push(Token::Literal);
        } else if matches!(current, 'u' | 'U')
            && next == Some('&')
            && matches!(chars.get(index + 2), Some('"' | '\''))
        {
            return Err(RejectReason::unrecognized("unicode escape text is not supported"));
        } else if current == '"' {
            let end = skip_quoted(&chars, index + 1, '"', false)?;
            let ident = chars[index + 1..end - 1].iter().collect::<String>().replace("\"\"", "\"");
            tokens.push(Token::QuotedIdent(ident));
            index = end;
        } else if current == '$' {
            match dollar_tag(&chars, index) {
                Some(tag) => {
                    index = skip_dollar_quoted(&chars, index + tag.chars().count(), &tag)?;
                    tokens.push(Token::Literal);
                }
                None => {
                    tokens.push(Token::Other);
                    index += 1;
                }
            }
        } else if current == ';' {
            tokens.push(Token::Semicolon);
            index += 1;
        } else if current == '(' {
            tokens.push(Token::OpenParen);
            index += 1;
        } else if is_ident_start(current) {
            let start = index;
            while chars.get(index).is_some_and(|ch| is_ident_continue(*ch)) {
                index += 1;
            }
            let word = chars[start..index].iter().collect::<String>().to_lowercase();
            if word == "uescape" {
                return Err(RejectReason::unrecognized("unicode escape text is not supported"));
            }
            tokens.push(Token::Word(word));
        } else if current.is_ascii_digit() {
            while chars.get(index).is_some_and(|ch| ch.is_ascii_alphanumeric() || *ch == '.') {
                index += 1;
            }
            tokens.push(Token::Literal);
        } else {
            tokens.push(Token::Other);
            index += 1;
        }
    }

    Ok(tokens)
}

/// Postgres block comments nest.
fn skip_block_comment(chars: &[char], start: usize) -> Result<usize, RejectReason> {
    let mut depth = 0usize;
    let mut index = start;
    loop {
        match (chars.get(index), chars.get(index + 1)) {
            (Some('/'), Some('*')) => {
                depth += 1;
                index += 2;
            }
            (Some('*'), Some('/')) => {
                depth -= 1;
                index += 2;
                if depth == 0 {
                    return Ok(index);
                }
            }
            (Some(_), _) => index += 1,
            (None, _) => return Err(RejectReason::unrecognized("unterminated block comment")),
        }
    }
}

/// Returns the index just past the closing quote. A doubled quote is an
/// escaped quote; `backslash` enables `E''` style escapes.
fn skip_quoted(
    chars: &[char],
    start: usize,
    quote: char,
    backslash: bool,
) -> Result<usize, RejectReason> {
    let mut index = start;
    while let Some(&current) = chars.get(index) {
        if backslash && current == '\\' {
            index += 2;
        } else if current == quote {
            if chars.get(index + 1) == Some(&quote) {
                index += 2;
            } else {
                return Ok(index + 1);
            }
        } else {
            index += 1;
        }
    }
    Err(RejectReason::unrecognized("unterminated quoted text"))
}

/// Reads a `$tag$` opener at `start`, returning the full tag including both
/// dollar signs. Positional parameters such as `$1` are not tags.
fn dollar_tag(chars: &[char], start: usize) -> Option<String> {
    let mut index = start + 1;
    while let Some(&current) = chars.get(index) {
        if current == '$' {
            return Some(chars[start..=index].iter().collect());
        }
        let valid =
            if index == start + 1 { is_ident_start(current) } else { is_ident_continue(current) };
        if !valid {
            return None;
        }
        index += 1;
    }
    None
}

fn skip_dollar_quoted(chars: &[char], start: usize, tag: &str) -> Result<usize, RejectReason> {
    let tag = tag.chars().collect::<Vec<_>>();
    let mut index = start;
    while index + tag.len() <= chars.len() {
        if chars[index..index + tag.len()] == tag[..] {
            return Ok(index + tag.len());
        }
        index += 1;
    }
    Err(RejectReason::unrecognized("unterminated dollar-quoted text"))
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}

#[cfg(test)]
mod tests {
    use super::{StatementValidator, Verdict};
    use crate::domain::statement::{SqlCandidate, StatementKind};
    use crate::errors::RejectReason;

    fn verdict(sql: &str) -> Verdict {
        StatementValidator::new().validate(&SqlCandidate::query(sql))
    }

    fn reject_reason(sql: &str) -> RejectReason {
        match verdict(sql) {
            Verdict::Reject(reason) => reason,
            Verdict::Accept(statement) => {
                panic!("expected `{sql}` to be rejected, accepted as `{}`", statement.sql())
            }
        }
    }

    #[test]
    fn plain_reads_are_accepted() {
        for sql in [
            "SELECT COUNT(*) FROM orders",
            "  select id, note from orders where note = 'drop table x; --' ;  ",
            "WITH recent AS (SELECT * FROM orders WHERE created_at > now() - interval '1 day') \
             SELECT count(*) FROM recent",
            "(SELECT 1) UNION (SELECT 2)",
            "VALUES (1, 'a'), (2, 'b')",
            "TABLE orders",
            "-- leading comment\nSELECT 1",
            "/* outer /* nested */ still comment */ SELECT 1",
            "SELECT $body$ delete from orders; $body$ AS text",
            "SELECT \"update\" FROM audit_log",
            "SELECT created_at, deleted_flag FROM orders",
        ] {
            assert!(verdict(sql).is_accept(), "expected `{sql}` to be accepted");
        }
    }

    #[test]
    fn accepted_statement_is_trimmed() {
        let statement = verdict("  SELECT 1  \n").into_result().expect("accepted");
        assert_eq!(statement.sql(), "SELECT 1");
    }

    #[test]
    fn mutation_verbs_are_rejected_regardless_of_case_and_comments() {
        for verb in ["insert", "update", "delete", "drop", "alter", "truncate", "grant"] {
            let variants = [
                format!("{verb} orders"),
                verb.to_uppercase() + " orders",
                format!("   \n\t{} orders  ", capitalize(verb)),
                format!("/* harmless */ {verb} orders"),
                format!("-- note\n{verb} orders -- trailing"),
                format!("({verb} orders)"),
            ];
            for sql in variants {
                assert_eq!(
                    reject_reason(&sql),
                    RejectReason::DisallowedOperation { keyword: verb.to_string() },
                    "`{sql}`"
                );
            }
        }
    }

    #[test]
    fn multiple_statements_are_rejected() {
        for sql in [
            "SELECT 1; SELECT 2",
            "SELECT 1;DROP TABLE orders",
            "SELECT 1; /* gap */ ; DELETE FROM orders;",
            "SELECT 1 -- comment\n; SELECT 2",
            "DELETE FROM orders; SELECT 1",
        ] {
            assert_eq!(reject_reason(sql), RejectReason::MultiStatementRejected, "`{sql}`");
        }
    }

    #[test]
    fn separators_inside_literals_and_comments_do_not_split() {
        assert!(verdict("SELECT 'a;b', E'it\\'s; fine', \"odd;name\" FROM t /* ; */").is_accept());
        assert!(verdict("SELECT 1; -- ; DROP TABLE orders").is_accept());
    }

    #[test]
    fn embedded_mutations_are_rejected() {
        assert_eq!(
            reject_reason("WITH gone AS (DELETE FROM orders RETURNING *) SELECT * FROM gone"),
            RejectReason::DisallowedOperation { keyword: "delete".to_string() }
        );
        assert_eq!(
            reject_reason("SELECT * INTO backup FROM orders"),
            RejectReason::DisallowedOperation { keyword: "into".to_string() }
        );
        assert_eq!(
            reject_reason("SELECT * FROM orders FOR UPDATE"),
            RejectReason::DisallowedOperation { keyword: "update".to_string() }
        );
    }

    #[test]
    fn side_effecting_functions_are_rejected() {
        for (sql, keyword) in [
            ("SELECT set_config('role', 'admin', false)", "set_config"),
            ("SELECT pg_catalog.nextval('orders_id_seq')", "nextval"),
            ("SELECT pg_sleep(100)", "pg_sleep"),
            ("SELECT * FROM dblink('host=x', 'delete from t') AS t(a int)", "dblink"),
            ("SELECT \"pg_terminate_backend\"(42)", "pg_terminate_backend"),
            ("SELECT query_to_xml('select 1', true, true, '')", "query_to_xml"),
        ] {
            assert_eq!(
                reject_reason(sql),
                RejectReason::DisallowedOperation { keyword: keyword.to_string() },
                "`{sql}`"
            );
        }
        assert!(verdict("SELECT nextval_count FROM stats").is_accept());
    }

    #[test]
    fn unicode_escaped_names_are_rejected() {
        for sql in [
            "SELECT U&\"\\0064blink_exec\"('dbname=shop', 'DELETE FROM orders')",
            "SELECT U&\"\\0070g_sleep\"(600)",
            "SELECT u&\"!0073etval\"('orders_id_seq', 1) UESCAPE '!'",
            "SELECT * FROM orders WHERE note = U&'d\\0061ta'",
            "SELECT \"note\" UESCAPE '!' FROM orders",
        ] {
            assert!(
                matches!(reject_reason(sql), RejectReason::UnrecognizedStatement { .. }),
                "`{sql}`"
            );
        }
        assert!(verdict("SELECT menu & 1, u & 2 FROM flags").is_accept());
    }

    #[test]
    fn unrecognized_and_empty_input_is_rejected() {
        assert!(matches!(
            reject_reason("EXPLAIN ANALYZE SELECT 1"),
            RejectReason::UnrecognizedStatement { .. }
        ));
        assert!(matches!(
            reject_reason("SHOW search_path"),
            RejectReason::UnrecognizedStatement { .. }
        ));
        assert!(matches!(reject_reason("42"), RejectReason::UnrecognizedStatement { .. }));
        assert_eq!(reject_reason(""), RejectReason::EmptyStatement);
        assert_eq!(reject_reason(" ; -- only a comment\n;"), RejectReason::EmptyStatement);
    }

    #[test]
    fn unterminated_tokens_fail_closed() {
        for sql in [
            "SELECT 'open",
            "SELECT 1 /* open",
            "SELECT $tag$ open",
            "SELECT \"open",
            "SELECT E'escaped quote \\'",
        ] {
            assert!(
                matches!(reject_reason(sql), RejectReason::UnrecognizedStatement { .. }),
                "`{sql}`"
            );
        }
    }

    #[test]
    fn declared_mutation_kind_is_rejected_even_for_selects() {
        let verdict = StatementValidator::new()
            .validate(&SqlCandidate::new("SELECT 1", StatementKind::Mutation));
        assert_eq!(
            verdict,
            Verdict::Reject(RejectReason::DisallowedOperation { keyword: "mutation".to_string() })
        );
    }

    fn capitalize(word: &str) -> String {
        let mut chars = word.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}
