//! SQL dump scanning.
//!
//! Extracts `CREATE TABLE` definitions and `INSERT INTO` row literals from a
//! raw dump blob with tolerant, table-driven pattern matching. The accepted
//! grammar is intentionally narrow (a closed set of dump dialects); this is
//! a scanner, not a SQL parser. Identifiers may be quoted with `"`, `'` or
//! backticks, statements end with `;`.

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};

/// Everything the scanner recovered from one dump blob.
#[derive(Debug, Default)]
pub struct SqlDump {
    pub tables: Vec<DumpTable>,
}

#[derive(Debug)]
pub struct DumpTable {
    pub name: String,
    /// Column display name and raw (un-canonicalized) type token, in
    /// definition order.
    pub columns: Vec<(String, String)>,
    pub inserts: Vec<DumpInsert>,
}

#[derive(Debug)]
pub struct DumpInsert {
    /// Explicit column-name clause; empty when the INSERT had none.
    pub columns: Vec<String>,
    /// Row tuples, each split into ordered scalar literals.
    pub rows: Vec<Vec<SqlLiteral>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlLiteral {
    Null,
    Boolean(bool),
    /// Numeric literal kept as text; the engine parses it against the
    /// target column's canonical type.
    Number(String),
    Text(String),
}

const TYPE_ALTERNATION: &str = r"(?:tiny|small|big)?int(?:\(\d+\))?|integer(?:\(\d+\))?|decimal(?:\(\d+(?:\s?,\s?\d+)?\))?|numeric(?:\(\d+(?:\s?,\s?\d+)?\))?|real|double\s+precision(?:\(\d+(?:\s?,\s?\d+)?\))?|(?:small|big)?serial|money|character\s+varying(?:\(\d+\))?|varchar(?:\(\d+\))?|character(?:\(\d+\))?|char(?:\(\d+\))?|text|bytea|timestamp(?:\s?\(\d+\))?(?:\s+with(?:out)?\s+time\s+zone)?|date|time(?:\s?\(\d+\))?(?:\s+with(?:out)?\s+time\s+zone)?|interval(?:\s+(?:year\s+to\s+month|day\s+to\s+hour|day\s+to\s+minute|day\s+to\s+second|hour\s+to\s+minute|hour\s+to\s+second|minute\s+to\s+second|year|month|day|hour|minute|second))?(?:\s?\(\d+\))?|boolean|point|line|lseg|box|path|polygon|circle|cidr|inet|macaddr|bit(?:\(\d+\))?|bit\s+varying(?:\(\d+\))?|uuid|xml|jsonb?|tsquery|tsvector";

fn build(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid dump pattern: {err}"))
}

fn re_create() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // The body alternates bare characters with single-level paren
        // groups so type parameters like int(11) don't close the capture.
        build(r#"CREATE\s+TABLE\s+(?:[\w$]+\.)?["'`]?([\w$]+)["'`]?\s*\(((?:[^();]|\([^()]*\))*)\)[^;]*;"#)
    })
}

fn re_column_def() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        build(&format!(
            r#"["'`]?([A-Za-z_][\w$]*)["'`]?\s+({TYPE_ALTERNATION})(?:\[\])*"#
        ))
    })
}

fn re_insert() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        build(
            r#"INSERT\s+INTO\s+(?:[\w$]+\.)?["'`]?([\w$]+)["'`]?\s*(?:\(([^)]*)\))?\s*VALUES\s*(.*?)\s*;"#,
        )
    })
}

fn re_tuple() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // One parenthesized row tuple; quoted literals may contain commas and
    // parens, so each quote style gets its own alternative.
    RE.get_or_init(|| {
        build(r#"\((?:'(?:''|\\.|[^'\\])*'|"(?:\\.|[^"\\])*"|`(?:\\.|[^`\\])*`|[^()'"`])*\)"#)
    })
}

fn re_literal() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        build(r#"'(?:''|\\.|[^'\\])*'|"(?:\\.|[^"\\])*"|`(?:\\.|[^`\\])*`|true|false|NULL|-?\d+(?:\.\d+)?"#)
    })
}

/// Scans a dump blob for table definitions and row inserts.
///
/// Inserts that reference a table never defined by a `CREATE TABLE` are
/// silently dropped.
pub fn parse(text: &str) -> SqlDump {
    let mut tables: Vec<DumpTable> = Vec::new();

    for caps in re_create().captures_iter(text) {
        let name = caps[1].to_string();
        let body = &caps[2];
        let columns = re_column_def()
            .captures_iter(body)
            .map(|col| (col[1].to_string(), col[2].to_string()))
            .collect::<Vec<_>>();
        tables.push(DumpTable {
            name,
            columns,
            inserts: Vec::new(),
        });
    }

    for caps in re_insert().captures_iter(text) {
        let name = &caps[1];
        let Some(table) = tables.iter_mut().find(|t| t.name == *name) else {
            log::debug!("dropping INSERT into undefined table '{name}'");
            continue;
        };
        let columns = caps
            .get(2)
            .map(|clause| split_column_clause(clause.as_str()))
            .unwrap_or_default();
        let rows = re_tuple()
            .find_iter(&caps[3])
            .map(|tuple| split_tuple(tuple.as_str()))
            .collect::<Vec<_>>();
        table.inserts.push(DumpInsert { columns, rows });
    }

    SqlDump { tables }
}

fn split_column_clause(clause: &str) -> Vec<String> {
    clause
        .split(',')
        .map(|part| part.trim().trim_matches(['"', '\'', '`']).to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

fn split_tuple(tuple: &str) -> Vec<SqlLiteral> {
    re_literal()
        .find_iter(tuple)
        .map(|m| classify_literal(m.as_str()))
        .collect()
}

fn classify_literal(raw: &str) -> SqlLiteral {
    if raw.eq_ignore_ascii_case("null") {
        return SqlLiteral::Null;
    }
    if raw.eq_ignore_ascii_case("true") {
        return SqlLiteral::Boolean(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return SqlLiteral::Boolean(false);
    }
    if let Some(quote) = raw.chars().next()
        && matches!(quote, '\'' | '"' | '`')
    {
        let inner = &raw[1..raw.len() - 1];
        return SqlLiteral::Text(normalize_text_literal(inner, quote));
    }
    SqlLiteral::Number(raw.to_string())
}

/// Unescapes a quoted literal's body and rewrites the zero-date sentinel
/// `0000-00-00` to the minimum representable date `0001-01-01`.
fn normalize_text_literal(inner: &str, quote: char) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            c if c == quote => {
                // Doubled quote escape; emit one and skip the second.
                if chars.peek() == Some(&quote) {
                    chars.next();
                }
                out.push(quote);
            }
            c => out.push(c),
        }
    }
    if let Some(rest) = out.strip_prefix("0000-00-00") {
        return format!("0001-01-01{rest}");
    }
    out
}
