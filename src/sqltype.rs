//! SQL type canonicalization.
//!
//! Dump files arrive in a mix of dialects; this module maps every raw type
//! token onto one canonical spelling with normalized parameters, using an
//! ordered table of whole-token patterns. A token must match exactly one
//! type family; zero or multiple matches fail with
//! [`StoreError::UnknownType`].

use std::sync::OnceLock;

use regex::{Captures, Regex, RegexBuilder};

use crate::error::{Result, StoreError};

struct TypeRule {
    family: &'static str,
    pattern: Regex,
    emit: fn(&Captures) -> String,
}

fn anchored(pattern: &str) -> Regex {
    RegexBuilder::new(&format!("^(?:{pattern})$"))
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid type pattern '{pattern}': {err}"))
}

/// Appends `(n)` when the capture named by index 1 is present.
fn with_length(base: &str, caps: &Captures) -> String {
    match caps.get(1) {
        Some(n) => format!("{base}({})", n.as_str()),
        None => base.to_string(),
    }
}

fn timezone_qualifier(caps: &Captures, group: usize) -> &'static str {
    match caps.get(group) {
        Some(q) if q.as_str().to_ascii_lowercase().contains("without") => " without time zone",
        Some(_) => " with time zone",
        None => "",
    }
}

fn temporal(base: &str, caps: &Captures) -> String {
    let mut out = base.to_string();
    if let Some(precision) = caps.get(1) {
        out.push_str(&format!(" ({})", precision.as_str()));
    }
    out.push_str(timezone_qualifier(caps, 2));
    out
}

fn rules() -> &'static Vec<TypeRule> {
    static RULES: OnceLock<Vec<TypeRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let rule = |family, pattern: &str, emit: fn(&Captures) -> String| TypeRule {
            family,
            pattern: anchored(pattern),
            emit,
        };
        vec![
            rule("smallint", r"(?:small|tiny)int(?:\s?\(\d+\))?|byte", |_| {
                "smallint".to_string()
            }),
            rule("int", r"(?:medium)?int(?:eger)?(?:\s?\(\d+\))?", |_| {
                "int".to_string()
            }),
            rule("bigint", r"bigint(?:\s?\(\d+\))?", |_| "bigint".to_string()),
            rule(
                "decimal",
                r"(?:decimal|numeric)(?:\s?\(\s?(\d+)\s?(?:,\s?(\d+)\s?)?\))?",
                |caps| match (caps.get(1), caps.get(2)) {
                    (Some(p), Some(s)) => format!("decimal({}, {})", p.as_str(), s.as_str()),
                    (Some(p), None) => format!("decimal({})", p.as_str()),
                    _ => "decimal".to_string(),
                },
            ),
            rule("real", r"real", |_| "real".to_string()),
            rule(
                "double precision",
                r"float\s?\(\d+\)|double(?:\s+precision)?(?:\s?\(\s?\d+\s?(?:,\s?\d+\s?)?\))?",
                |_| "double precision".to_string(),
            ),
            rule("smallserial", r"smallserial", |_| "smallserial".to_string()),
            rule("serial", r"serial", |_| "serial".to_string()),
            rule("bigserial", r"bigserial", |_| "bigserial".to_string()),
            rule("money", r"(?:small)?money", |_| "money".to_string()),
            rule(
                "varchar",
                r"(?:varchar|character\s+varying)(?:\s?\(\s?(\d+)\s?\))?",
                |caps| with_length("varchar", caps),
            ),
            rule("char", r"char(?:acter)?(?:\s?\(\s?(\d+)\s?\))?", |caps| {
                with_length("char", caps)
            }),
            rule("text", r"(?:tiny|medium|long)?text", |_| "text".to_string()),
            rule("bytea", r"bytea|(?:tiny|medium|long)?blob", |_| {
                "bytea".to_string()
            }),
            rule(
                "timestamp",
                r"timestamp(?:\s?\(\s?(\d+)\s?\))?(\s?with(?:out)?\s+time\s+zone)?",
                |caps| temporal("timestamp", caps),
            ),
            rule("date", r"date", |_| "date".to_string()),
            rule(
                "time",
                r"time(?:\s?\(\s?(\d+)\s?\))?(\s?with(?:out)?\s+time\s+zone)?",
                |caps| temporal("time", caps),
            ),
            rule(
                "interval",
                r"interval(?:\s+(year\s+to\s+month|day\s+to\s+hour|day\s+to\s+minute|day\s+to\s+second|hour\s+to\s+minute|hour\s+to\s+second|minute\s+to\s+second|year|month|day|hour|minute|second))?(?:\s?\(\s?(\d+)\s?\))?",
                |caps| {
                    let mut out = "interval".to_string();
                    if let Some(unit) = caps.get(1) {
                        let unit = unit
                            .as_str()
                            .to_ascii_lowercase()
                            .split_whitespace()
                            .collect::<Vec<_>>()
                            .join(" ");
                        out.push_str(&format!(" {unit}"));
                    }
                    if let Some(precision) = caps.get(2) {
                        out.push_str(&format!(" ({})", precision.as_str()));
                    }
                    out
                },
            ),
            rule("boolean", r"bool(?:ean)?", |_| "boolean".to_string()),
            rule("point", r"point", |_| "point".to_string()),
            rule("line", r"line", |_| "line".to_string()),
            rule("lseg", r"lseg", |_| "lseg".to_string()),
            rule("box", r"box", |_| "box".to_string()),
            rule("path", r"path", |_| "path".to_string()),
            rule("polygon", r"polygon", |_| "polygon".to_string()),
            rule("circle", r"circle", |_| "circle".to_string()),
            rule("cidr", r"cidr", |_| "cidr".to_string()),
            rule("inet", r"inet", |_| "inet".to_string()),
            rule("macaddr", r"macaddr", |_| "macaddr".to_string()),
            rule("uuid", r"uuid", |_| "uuid".to_string()),
        ]
    })
}

/// Normalizes a raw SQL type token into its canonical spelling.
///
/// The whole token is matched case-insensitively against the rule table;
/// exactly one family must accept it.
pub fn canonicalize(raw: &str) -> Result<String> {
    let token = raw.trim();
    let mut matched: Option<String> = None;
    for rule in rules() {
        if let Some(caps) = rule.pattern.captures(token) {
            let emitted = (rule.emit)(&caps);
            if matched.is_some() {
                log::debug!("type token '{token}' is ambiguous (family '{}')", rule.family);
                return Err(StoreError::UnknownType(raw.to_string()));
            }
            matched = Some(emitted);
        }
    }
    matched.ok_or_else(|| StoreError::UnknownType(raw.to_string()))
}

/// Maps a canonical SQL type onto the cell kind the engine validates against.
pub fn kind_for_canonical(canonical: &str) -> crate::data::ColumnKind {
    use crate::data::ColumnKind;

    let head = canonical.split(['(', ' ']).next().unwrap_or(canonical);
    match head {
        "smallint" | "int" | "bigint" | "smallserial" | "serial" | "bigserial" => {
            ColumnKind::Integer
        }
        "decimal" | "real" | "double" | "money" => ColumnKind::Float,
        "boolean" => ColumnKind::Boolean,
        "date" => ColumnKind::Date,
        "timestamp" => ColumnKind::DateTime,
        _ => ColumnKind::String,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ColumnKind;

    #[test]
    fn integer_spellings_share_one_canonical_form() {
        assert_eq!(canonicalize("INT(11)").unwrap(), "int");
        assert_eq!(canonicalize("INTEGER").unwrap(), "int");
        assert_eq!(canonicalize("mediumint").unwrap(), "int");
        assert_eq!(canonicalize("INT(11)").unwrap(), canonicalize("INTEGER").unwrap());
    }

    #[test]
    fn varchar_round_trips_its_length() {
        assert_eq!(canonicalize("varchar(50)").unwrap(), "varchar(50)");
        assert_eq!(canonicalize("character varying( 120 )").unwrap(), "varchar(120)");
        assert_eq!(canonicalize("VARCHAR").unwrap(), "varchar");
    }

    #[test]
    fn doubles_and_floats_collapse_to_double_precision() {
        assert_eq!(canonicalize("DOUBLE(10,2)").unwrap(), "double precision");
        assert_eq!(canonicalize("double precision").unwrap(), "double precision");
        assert_eq!(canonicalize("float(24)").unwrap(), "double precision");
    }

    #[test]
    fn decimal_parameters_are_normalized() {
        assert_eq!(canonicalize("NUMERIC(10, 2)").unwrap(), "decimal(10, 2)");
        assert_eq!(canonicalize("decimal(8)").unwrap(), "decimal(8)");
        assert_eq!(canonicalize("decimal").unwrap(), "decimal");
    }

    #[test]
    fn temporal_qualifiers_are_preserved() {
        assert_eq!(
            canonicalize("timestamp with time zone").unwrap(),
            "timestamp with time zone"
        );
        assert_eq!(
            canonicalize("TIMESTAMP(3) WITHOUT TIME ZONE").unwrap(),
            "timestamp (3) without time zone"
        );
        assert_eq!(canonicalize("time(2)").unwrap(), "time (2)");
        assert_eq!(
            canonicalize("interval day to second (2)").unwrap(),
            "interval day to second (2)"
        );
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        assert!(matches!(
            canonicalize("bogus_type"),
            Err(StoreError::UnknownType(raw)) if raw == "bogus_type"
        ));
        assert!(canonicalize("").is_err());
    }

    #[test]
    fn canonical_types_map_onto_cell_kinds() {
        assert_eq!(kind_for_canonical("int"), ColumnKind::Integer);
        assert_eq!(kind_for_canonical("decimal(10, 2)"), ColumnKind::Float);
        assert_eq!(kind_for_canonical("varchar(50)"), ColumnKind::String);
        assert_eq!(
            kind_for_canonical("timestamp with time zone"),
            ColumnKind::DateTime
        );
    }
}
