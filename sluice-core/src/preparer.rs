use crate::{Error, Result};
use indexmap::IndexMap;
use std::{
    collections::HashSet,
    fmt::{self, Display},
    ops::Deref,
};

/// Maps the schema a statement was compiled against to the schema it runs against.
///
/// The `None` key stands for objects compiled without a schema, a `None`
/// target renders the dialect default schema.
pub type SchemaTranslateMap = IndexMap<Option<String>, Option<String>>;

pub const SCHEMA_TOKEN_PREFIX: &str = "__[SCHEMA_";
pub const SCHEMA_TOKEN_NONE: &str = "_none";

pub static RESERVED_WORDS: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric",
    "authorization", "between", "binary", "both", "case", "cast", "check", "collate", "column",
    "constraint", "create", "cross", "current_date", "current_role", "current_time",
    "current_timestamp", "current_user", "default", "deferrable", "desc", "distinct", "do",
    "else", "end", "except", "false", "for", "foreign", "freeze", "from", "full", "grant",
    "group", "having", "ilike", "in", "initially", "inner", "intersect", "into", "is",
    "isnull", "join", "leading", "left", "like", "limit", "localtime", "localtimestamp",
    "natural", "new", "not", "notnull", "null", "off", "offset", "old", "on", "only", "or",
    "order", "outer", "overlaps", "placing", "primary", "references", "right", "select",
    "session_user", "set", "similar", "some", "symmetric", "table", "then", "to", "trailing",
    "true", "union", "unique", "user", "using", "verbose", "when", "where",
];

/// Identifier carrying an explicit quoting decision.
///
/// `quote` is `Some(true)` when the name must always be quoted, `Some(false)`
/// when it must never be, `None` leaves the decision to the preparer. A name
/// forced to be quoted is case sensitive, so case folding leaves it untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuotedName {
    value: String,
    quote: Option<bool>,
}

impl QuotedName {
    pub fn new(value: impl Into<String>, quote: Option<bool>) -> Self {
        Self {
            value: value.into(),
            quote,
        }
    }
    pub fn plain(value: impl Into<String>) -> Self {
        Self::new(value, None)
    }
    pub fn quoted(value: impl Into<String>) -> Self {
        Self::new(value, Some(true))
    }
    pub fn quote(&self) -> Option<bool> {
        self.quote
    }
    pub fn as_str(&self) -> &str {
        &self.value
    }
    pub fn into_string(self) -> String {
        self.value
    }
    pub fn lower(&self) -> QuotedName {
        if self.quote == Some(true) {
            return self.clone();
        }
        Self::new(self.value.to_lowercase(), self.quote)
    }
    pub fn upper(&self) -> QuotedName {
        if self.quote == Some(true) {
            return self.clone();
        }
        Self::new(self.value.to_uppercase(), self.quote)
    }
}

impl Deref for QuotedName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl Display for QuotedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl From<&str> for QuotedName {
    fn from(value: &str) -> Self {
        Self::plain(value)
    }
}

impl From<String> for QuotedName {
    fn from(value: String) -> Self {
        Self::plain(value)
    }
}

impl PartialEq<str> for QuotedName {
    fn eq(&self, other: &str) -> bool {
        self.value == other
    }
}

impl PartialEq<&str> for QuotedName {
    fn eq(&self, other: &&str) -> bool {
        self.value == *other
    }
}

/// Quotes and folds identifiers following the case rules of a backend.
#[derive(Debug, Clone)]
pub struct IdentifierPreparer {
    pub initial_quote: char,
    pub final_quote: char,
    pub escape_quote: String,
    pub reserved_words: HashSet<String>,
}

impl Default for IdentifierPreparer {
    fn default() -> Self {
        Self {
            initial_quote: '"',
            final_quote: '"',
            escape_quote: r#""""#.into(),
            reserved_words: RESERVED_WORDS.iter().map(|v| v.to_string()).collect(),
        }
    }
}

impl IdentifierPreparer {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_reserved_words<'a>(mut self, words: impl IntoIterator<Item = &'a str>) -> Self {
        self.reserved_words
            .extend(words.into_iter().map(|v| v.to_lowercase()));
        self
    }

    pub fn write_escaped(&self, out: &mut String, value: &str) {
        let mut position = 0;
        for (i, c) in value.char_indices() {
            if c == self.final_quote {
                out.push_str(&value[position..i]);
                out.push_str(&self.escape_quote);
                position = i + c.len_utf8();
            }
        }
        out.push_str(&value[position..]);
    }

    pub fn write_identifier_quoted(&self, out: &mut String, value: &str) {
        out.push(self.initial_quote);
        self.write_escaped(out, value);
        out.push(self.final_quote);
    }

    pub fn quote_identifier(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len() + 2);
        self.write_identifier_quoted(&mut out, value);
        out
    }

    /// True when the value cannot be rendered bare because of its characters alone.
    pub fn requires_quotes_illegal_chars(&self, value: &str) -> bool {
        let mut chars = value.chars();
        match chars.next() {
            None => true,
            Some(c) if c.is_ascii_digit() || c == '$' || c == '_' => true,
            Some(c) => {
                !c.is_ascii_alphanumeric()
                    || chars.any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
            }
        }
    }

    /// True when the value would not survive a round trip unquoted: reserved words,
    /// illegal characters and any name that is not all lower case.
    pub fn requires_quotes(&self, value: &str) -> bool {
        let lower = value.to_lowercase();
        self.reserved_words.contains(&lower)
            || self.requires_quotes_illegal_chars(value)
            || lower != value
    }

    pub fn quote(&self, name: &QuotedName) -> String {
        let force = match name.quote() {
            Some(force) => force,
            None => self.requires_quotes(name),
        };
        if force {
            self.quote_identifier(name)
        } else {
            name.to_string()
        }
    }

    pub fn quote_schema(&self, schema: &str) -> String {
        self.quote(&QuotedName::plain(schema))
    }

    /// Optionally schema qualified name, used for sequences and tables.
    pub fn format_qualified(&self, schema: Option<&str>, name: &str) -> String {
        let mut out = String::new();
        if let Some(schema) = schema {
            out.push_str(&self.quote_schema(schema));
            out.push('.');
        }
        out.push_str(&self.quote(&QuotedName::plain(name)));
        out
    }

    /// Canonical case preserving form of a name read from a backend that folds to upper case.
    pub fn normalize_name(&self, name: &str) -> QuotedName {
        let lower = name.to_lowercase();
        let upper = name.to_uppercase();
        if lower == upper {
            QuotedName::plain(name)
        } else if upper == name && !self.requires_quotes(&lower) {
            QuotedName::plain(lower)
        } else if lower == name {
            QuotedName::quoted(name)
        } else {
            QuotedName::plain(name)
        }
    }

    /// Inverse of [`IdentifierPreparer::normalize_name`].
    pub fn denormalize_name(&self, name: &QuotedName) -> String {
        let lower = name.lower();
        let upper = name.upper();
        if lower == upper {
            name.to_string()
        } else if lower == *name && !self.requires_quotes(&lower) {
            upper.into_string()
        } else {
            name.to_string()
        }
    }

    /// Replaces the `__[SCHEMA_<name>]` tokens of a compiled statement.
    ///
    /// Tokens naming a schema missing from the map render that schema itself;
    /// the `_none` token must find a `None` key.
    pub fn render_schema_translates(
        &self,
        statement: &str,
        map: &SchemaTranslateMap,
        default_schema: Option<&str>,
    ) -> Result<String> {
        let mut out = String::with_capacity(statement.len());
        let mut rest = statement;
        while let Some(start) = rest.find(SCHEMA_TOKEN_PREFIX) {
            out.push_str(&rest[..start]);
            let after = &rest[start + SCHEMA_TOKEN_PREFIX.len()..];
            let Some(end) = after.find(']') else {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            };
            let name = &after[..end];
            let key = (name != SCHEMA_TOKEN_NONE).then(|| name.to_string());
            let effective = match map.get(&key) {
                Some(target) => target.as_deref(),
                None if key.is_none() => {
                    return Err(Error::invalid_request(
                        "The schema translate map has no `None` key, the schema of the compiled statement cannot be applied",
                    ));
                }
                None => Some(name),
            };
            let effective = match effective.or(default_schema) {
                Some(v) => v,
                None => {
                    return Err(Error::invalid_request(
                        "Dialect has no default schema name, None cannot be a schema translate target",
                    ));
                }
            };
            out.push_str(&self.quote_schema(effective));
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}
