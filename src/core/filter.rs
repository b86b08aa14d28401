//! LDAP search filters (RFC 4515 string form) and entry matching.

use std::cmp::Ordering;
use std::fmt::{self, Write as _};
use std::str::FromStr;

use super::entry::Entry;
use super::error::{CoreError, InvalidFilter};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchFilter {
    And(Vec<SearchFilter>),
    Or(Vec<SearchFilter>),
    Not(Box<SearchFilter>),
    Equality {
        attr: String,
        value: String,
    },
    GreaterOrEqual {
        attr: String,
        value: String,
    },
    LessOrEqual {
        attr: String,
        value: String,
    },
    Approximate {
        attr: String,
        value: String,
    },
    Present {
        attr: String,
    },
    Substring {
        attr: String,
        initial: Option<String>,
        any: Vec<String>,
        last: Option<String>,
    },
}

impl SearchFilter {
    pub fn equality(attr: impl Into<String>, value: impl Into<String>) -> Self {
        SearchFilter::Equality {
            attr: attr.into(),
            value: value.into(),
        }
    }

    /// `(objectClass=*)`, matching every entry.
    pub fn match_all() -> Self {
        SearchFilter::Present {
            attr: "objectClass".to_string(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let trimmed = raw.trim();
        let wrapped;
        let input = if trimmed.starts_with('(') {
            trimmed
        } else {
            wrapped = format!("({trimmed})");
            &wrapped
        };
        let mut parser = Parser {
            raw,
            input: input.as_bytes(),
            pos: 0,
        };
        let filter = parser.filter()?;
        if parser.pos != parser.input.len() {
            return Err(parser.error("trailing characters after filter"));
        }
        Ok(filter)
    }

    /// Attribute type for simple (non-composite) filters.
    pub fn attribute(&self) -> Option<&str> {
        match self {
            SearchFilter::Equality { attr, .. }
            | SearchFilter::GreaterOrEqual { attr, .. }
            | SearchFilter::LessOrEqual { attr, .. }
            | SearchFilter::Approximate { attr, .. }
            | SearchFilter::Present { attr }
            | SearchFilter::Substring { attr, .. } => Some(attr),
            SearchFilter::And(_) | SearchFilter::Or(_) | SearchFilter::Not(_) => None,
        }
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            SearchFilter::And(components) => components.iter().all(|f| f.matches(entry)),
            SearchFilter::Or(components) => components.iter().any(|f| f.matches(entry)),
            SearchFilter::Not(inner) => !inner.matches(entry),
            SearchFilter::Equality { attr, value } | SearchFilter::Approximate { attr, value } => {
                entry
                    .values_of(attr)
                    .into_iter()
                    .any(|v| compare_values(v, value) == Ordering::Equal)
            }
            SearchFilter::GreaterOrEqual { attr, value } => entry
                .values_of(attr)
                .into_iter()
                .any(|v| compare_values(v, value) != Ordering::Less),
            SearchFilter::LessOrEqual { attr, value } => entry
                .values_of(attr)
                .into_iter()
                .any(|v| compare_values(v, value) != Ordering::Greater),
            SearchFilter::Present { attr } => !entry.values_of(attr).is_empty(),
            SearchFilter::Substring {
                attr,
                initial,
                any,
                last,
            } => entry
                .values_of(attr)
                .into_iter()
                .any(|v| substring_matches(v, initial.as_deref(), any, last.as_deref())),
        }
    }
}

/// Integers compare numerically, everything else case-insensitively.
fn compare_values(left: &str, right: &str) -> Ordering {
    if let (Some(l), Some(r)) = (parse_integer(left.trim()), parse_integer(right.trim())) {
        return l.cmp(&r);
    }
    left.to_lowercase().cmp(&right.to_lowercase())
}

/// Parses an integer literal: optional sign, then decimal digits or a
/// `0x`/`#` prefixed hexadecimal number.
pub fn parse_integer(raw: &str) -> Option<i64> {
    let (negative, unsigned) = match raw.as_bytes().first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };
    let (digits, radix) = if let Some(hex) = unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
        .or_else(|| unsigned.strip_prefix('#'))
    {
        (hex, 16)
    } else {
        (unsigned, 10)
    };
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    let magnitude = i128::from_str_radix(digits, radix).ok()?;
    let value = if negative { -magnitude } else { magnitude };
    i64::try_from(value).ok()
}

fn substring_matches(value: &str, initial: Option<&str>, any: &[String], last: Option<&str>) -> bool {
    let value = value.to_lowercase();
    let mut rest = value.as_str();
    if let Some(initial) = initial {
        let initial = initial.to_lowercase();
        let Some(stripped) = rest.strip_prefix(initial.as_str()) else {
            return false;
        };
        rest = stripped;
    }
    for part in any {
        let part = part.to_lowercase();
        let Some(idx) = rest.find(part.as_str()) else {
            return false;
        };
        rest = &rest[idx + part.len()..];
    }
    match last {
        Some(last) => rest.ends_with(last.to_lowercase().as_str()),
        None => true,
    }
}

impl FromStr for SearchFilter {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SearchFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchFilter::And(components) => {
                f.write_str("(&")?;
                for component in components {
                    write!(f, "{component}")?;
                }
                f.write_str(")")
            }
            SearchFilter::Or(components) => {
                f.write_str("(|")?;
                for component in components {
                    write!(f, "{component}")?;
                }
                f.write_str(")")
            }
            SearchFilter::Not(inner) => write!(f, "(!{inner})"),
            SearchFilter::Equality { attr, value } => write!(f, "({attr}={})", Escaped(value)),
            SearchFilter::GreaterOrEqual { attr, value } => {
                write!(f, "({attr}>={})", Escaped(value))
            }
            SearchFilter::LessOrEqual { attr, value } => write!(f, "({attr}<={})", Escaped(value)),
            SearchFilter::Approximate { attr, value } => write!(f, "({attr}~={})", Escaped(value)),
            SearchFilter::Present { attr } => write!(f, "({attr}=*)"),
            SearchFilter::Substring {
                attr,
                initial,
                any,
                last,
            } => {
                write!(f, "({attr}=")?;
                if let Some(initial) = initial {
                    write!(f, "{}", Escaped(initial))?;
                }
                f.write_str("*")?;
                for part in any {
                    write!(f, "{}*", Escaped(part))?;
                }
                if let Some(last) = last {
                    write!(f, "{}", Escaped(last))?;
                }
                f.write_str(")")
            }
        }
    }
}

struct Escaped<'a>(&'a str);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ch in self.0.chars() {
            match ch {
                '*' | '(' | ')' | '\\' | '\0' => write!(f, "\\{:02x}", ch as u32)?,
                _ => f.write_char(ch)?,
            }
        }
        Ok(())
    }
}

struct Parser<'a> {
    raw: &'a str,
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> CoreError {
        CoreError::from(InvalidFilter {
            raw: self.raw.to_string(),
            offset: self.pos,
            reason: reason.to_string(),
        })
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn expect(&mut self, byte: u8) -> Result<(), CoreError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected `{}`", byte as char)))
        }
    }

    fn filter(&mut self) -> Result<SearchFilter, CoreError> {
        self.expect(b'(')?;
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                SearchFilter::And(self.filter_list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                SearchFilter::Or(self.filter_list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                SearchFilter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn filter_list(&mut self) -> Result<Vec<SearchFilter>, CoreError> {
        let mut components = Vec::new();
        while self.peek() == Some(b'(') {
            components.push(self.filter()?);
        }
        Ok(components)
    }

    fn item(&mut self) -> Result<SearchFilter, CoreError> {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b';' | b'_') {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.error("missing attribute type"));
        }
        let attr = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();

        let op = match (self.peek(), self.input.get(self.pos + 1).copied()) {
            (Some(b'>'), Some(b'=')) => Some(b'>'),
            (Some(b'<'), Some(b'=')) => Some(b'<'),
            (Some(b'~'), Some(b'=')) => Some(b'~'),
            (Some(b'='), _) => None,
            _ => return Err(self.error("expected a filter operator")),
        };
        self.pos += if op.is_some() { 2 } else { 1 };

        let value_start = self.pos;
        while let Some(byte) = self.peek() {
            if byte == b')' {
                break;
            }
            if byte == b'(' {
                return Err(self.error("unescaped `(` in assertion value"));
            }
            self.pos += 1;
        }
        let raw_value = &self.input[value_start..self.pos];

        match op {
            Some(b'>') => Ok(SearchFilter::GreaterOrEqual {
                attr,
                value: self.unescape(raw_value)?,
            }),
            Some(b'<') => Ok(SearchFilter::LessOrEqual {
                attr,
                value: self.unescape(raw_value)?,
            }),
            Some(_) => Ok(SearchFilter::Approximate {
                attr,
                value: self.unescape(raw_value)?,
            }),
            None if raw_value == b"*" => Ok(SearchFilter::Present { attr }),
            None if raw_value.contains(&b'*') => self.substring(attr, raw_value),
            None => Ok(SearchFilter::Equality {
                attr,
                value: self.unescape(raw_value)?,
            }),
        }
    }

    fn substring(&self, attr: String, raw_value: &[u8]) -> Result<SearchFilter, CoreError> {
        let pieces: Vec<&[u8]> = raw_value.split(|b| *b == b'*').collect();
        let (first, rest) = pieces.split_first().ok_or_else(|| self.error("empty substring"))?;
        let (last, middle) = rest.split_last().ok_or_else(|| self.error("empty substring"))?;
        let initial = if first.is_empty() {
            None
        } else {
            Some(self.unescape(first)?)
        };
        let last = if last.is_empty() {
            None
        } else {
            Some(self.unescape(last)?)
        };
        let mut any = Vec::new();
        for piece in middle {
            if piece.is_empty() {
                return Err(self.error("consecutive `*` in substring"));
            }
            any.push(self.unescape(piece)?);
        }
        Ok(SearchFilter::Substring {
            attr,
            initial,
            any,
            last,
        })
    }

    fn unescape(&self, raw: &[u8]) -> Result<String, CoreError> {
        let mut out = Vec::with_capacity(raw.len());
        let mut idx = 0;
        while idx < raw.len() {
            if raw[idx] != b'\\' {
                out.push(raw[idx]);
                idx += 1;
                continue;
            }
            let byte = raw
                .get(idx + 1..idx + 3)
                .and_then(|pair| std::str::from_utf8(pair).ok())
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| self.error("invalid escape in assertion value"))?;
            out.push(byte);
            idx += 3;
        }
        String::from_utf8(out).map_err(|_| self.error("assertion value is not valid utf-8"))
    }
}
