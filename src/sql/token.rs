//! SQL tokens, the atomic units of SQL output.
//!
//! The compiler never concatenates SQL strings directly: expressions and
//! queries write tokens into a [`TokenStream`], and only the stream decides
//! how each token is spelled for a dialect.

use super::dialect::{Dialect, SqlDialect};

/// Reserved words the renderer emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Select,
    Distinct,
    From,
    Where,
    GroupBy,
    Having,
    OrderBy,
    Limit,
    With,
    As,
    UnionAll,
    Join,
    Left,
    Cross,
    On,
    And,
    Or,
    Not,
    Like,
    In,
    IsNull,
    IsNotNull,
    Case,
    When,
    Then,
    Else,
    End,
    Asc,
    Desc,
    NullsFirst,
    NullsLast,
    Over,
    PartitionBy,
    True,
    False,
}

impl Keyword {
    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::Select => "SELECT",
            Keyword::Distinct => "DISTINCT",
            Keyword::From => "FROM",
            Keyword::Where => "WHERE",
            Keyword::GroupBy => "GROUP BY",
            Keyword::Having => "HAVING",
            Keyword::OrderBy => "ORDER BY",
            Keyword::Limit => "LIMIT",
            Keyword::With => "WITH",
            Keyword::As => "AS",
            Keyword::UnionAll => "UNION ALL",
            Keyword::Join => "JOIN",
            Keyword::Left => "LEFT",
            Keyword::Cross => "CROSS",
            Keyword::On => "ON",
            Keyword::And => "AND",
            Keyword::Or => "OR",
            Keyword::Not => "NOT",
            Keyword::Like => "LIKE",
            Keyword::In => "IN",
            Keyword::IsNull => "IS NULL",
            Keyword::IsNotNull => "IS NOT NULL",
            Keyword::Case => "CASE",
            Keyword::When => "WHEN",
            Keyword::Then => "THEN",
            Keyword::Else => "ELSE",
            Keyword::End => "END",
            Keyword::Asc => "ASC",
            Keyword::Desc => "DESC",
            Keyword::NullsFirst => "NULLS FIRST",
            Keyword::NullsLast => "NULLS LAST",
            Keyword::Over => "OVER",
            Keyword::PartitionBy => "PARTITION BY",
            Keyword::True => "TRUE",
            Keyword::False => "FALSE",
        }
    }
}

/// One unit of SQL output.
///
/// Variants carrying model data (`Ident`, `Str`, ...) are escaped per
/// dialect; `Symbol` and `Raw` are emitted verbatim and only ever hold
/// compiler-produced text.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Keyword(Keyword),
    /// Punctuation or a dialect-neutral operator: `(`, `,`, `<=`, ...
    Symbol(&'static str),
    /// `||`, or whatever the dialect spells string concatenation with.
    Concat,
    /// `IS NOT DISTINCT FROM` or `<=>`.
    NullSafeEq,

    Space,
    Newline,
    Indent(usize),

    /// Column, alias or CTE name.
    Ident(String),
    /// Dotted table path as written in the model.
    TablePath(String),
    Int(i64),
    Float(f64),
    /// Numeric literal kept in its source spelling.
    Number(String),
    Str(String),
    Bool(bool),
    Null,
    /// Function name, remapped per dialect.
    Function(String),
    Raw(String),
}

impl Token {
    fn write(&self, dialect: Dialect, out: &mut String) {
        match self {
            Token::Keyword(kw) => out.push_str(kw.as_str()),
            Token::Symbol(s) => out.push_str(s),
            Token::Concat => out.push_str(dialect.concat_operator()),
            Token::NullSafeEq => out.push_str(dialect.null_safe_eq_operator()),
            Token::Space => out.push(' '),
            Token::Newline => out.push('\n'),
            Token::Indent(depth) => {
                for _ in 0..*depth {
                    out.push_str("  ");
                }
            }
            Token::Ident(name) => out.push_str(&dialect.quote_identifier(name)),
            Token::TablePath(path) => out.push_str(&dialect.quote_table_path(path)),
            Token::Int(n) => out.push_str(&n.to_string()),
            // No dialect has a portable spelling for NaN or infinity
            Token::Float(f) if !f.is_finite() => out.push_str("NULL"),
            Token::Float(f) => out.push_str(ryu::Buffer::new().format_finite(*f)),
            Token::Number(text) => out.push_str(text),
            Token::Str(s) => out.push_str(&dialect.quote_string(s)),
            Token::Bool(b) => out.push_str(dialect.format_bool(*b)),
            Token::Null => out.push_str("NULL"),
            Token::Function(name) => {
                let name = dialect.remap_function(name).unwrap_or(name.as_str());
                out.push_str(&name.to_uppercase());
            }
            Token::Raw(sql) => out.push_str(sql),
        }
    }
}

/// Tokens accumulated by the renderers, spelled out by [`TokenStream::serialize`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenStream {
    tokens: Vec<Token>,
}

impl TokenStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, token: Token) -> &mut Self {
        self.tokens.push(token);
        self
    }

    pub fn kw(&mut self, keyword: Keyword) -> &mut Self {
        self.push(Token::Keyword(keyword))
    }

    /// ` KEYWORD `
    pub fn spaced(&mut self, keyword: Keyword) -> &mut Self {
        self.space().kw(keyword).space()
    }

    pub fn sym(&mut self, symbol: &'static str) -> &mut Self {
        self.push(Token::Symbol(symbol))
    }

    pub fn ident(&mut self, name: &str) -> &mut Self {
        self.push(Token::Ident(name.to_string()))
    }

    pub fn space(&mut self) -> &mut Self {
        self.push(Token::Space)
    }

    pub fn newline(&mut self) -> &mut Self {
        self.push(Token::Newline)
    }

    pub fn indent(&mut self, depth: usize) -> &mut Self {
        self.push(Token::Indent(depth))
    }

    /// Render `items` separated by `, `.
    pub fn list<T>(&mut self, items: &[T], mut each: impl FnMut(&T, &mut Self)) -> &mut Self {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.sym(",").space();
            }
            each(item, self);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn serialize(&self, dialect: Dialect) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            token.write(dialect, &mut out);
        }
        out
    }
}
