//! Positional `$N` placeholder resolution.
//!
//! Plugin output is line oriented: every non-blank line is split on a
//! delimiter into fields, and descriptor templates pick fields out of it
//! with `$1`, `$2`, ... (1-based).

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::error::FleetError;
use crate::types::{validate_identifier, IdentityCondition, PropertyMap, PropertyValue};

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\d+").expect("token pattern is valid"));

/// Row-scoped resolution failure. The row is skipped; the plugin continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template {template:?} references field {index} but the row has {len} fields")]
    OutOfRange {
        template: String,
        index: usize,
        len: usize,
    },

    #[error("condition term {key:?} resolved to {value:?}, which is not a number or boolean")]
    InvalidLiteral { key: String, value: String },
}

/// One tokenized line of plugin output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row<'a> {
    /// 1-based line number in the plugin output.
    pub line: usize,
    pub fields: Vec<&'a str>,
}

/// Split plugin output into rows, skipping blank lines.
pub fn rows(output: &str, delimiter: char) -> impl Iterator<Item = Row<'_>> {
    output.split('\n').enumerate().filter_map(move |(i, line)| {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            tracing::debug!(line = i + 1, "Skipping blank line");
            return None;
        }
        Some(Row {
            line: i + 1,
            fields: line.split(delimiter).collect(),
        })
    })
}

/// Replace every `$N` in `template` with `fields[N-1]`.
pub fn resolve(template: &str, fields: &[&str]) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for token in TOKEN.find_iter(template) {
        // Digits beyond usize can never be in range.
        let index = token.as_str()[1..].parse::<usize>().unwrap_or(usize::MAX);
        let field = index
            .checked_sub(1)
            .and_then(|i| fields.get(i))
            .ok_or_else(|| TemplateError::OutOfRange {
                template: template.to_string(),
                index,
                len: fields.len(),
            })?;

        out.push_str(&template[last..token.start()]);
        out.push_str(field);
        last = token.end();
    }

    out.push_str(&template[last..]);
    Ok(out)
}

/// Resolve a property value. Only strings can carry tokens.
pub fn resolve_value(value: &PropertyValue, fields: &[&str]) -> Result<PropertyValue, TemplateError> {
    match value {
        PropertyValue::String(s) => Ok(PropertyValue::String(resolve(s, fields)?)),
        other => Ok(other.clone()),
    }
}

/// Resolve every value of a template map against the same row.
pub fn resolve_properties(
    templates: &PropertyMap,
    fields: &[&str],
) -> Result<PropertyMap, TemplateError> {
    templates
        .iter()
        .map(|(key, value)| Ok((key.clone(), resolve_value(value, fields)?)))
        .collect()
}

// ── Identity conditions ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct ConditionTerm {
    key: String,
    value: String,
    quoted: bool,
}

/// A parsed identity condition such as `ip: '$1', port: $2`.
///
/// Keys are validated at parse time; values stay templates until a row is
/// available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionTemplate {
    terms: Vec<ConditionTerm>,
}

impl ConditionTemplate {
    /// Parse a condition. Blank input means "no condition".
    pub fn parse(raw: &str) -> Result<Option<Self>, FleetError> {
        let chars: Vec<char> = raw.chars().collect();
        let fail = |reason: &str| FleetError::Condition {
            condition: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut terms = Vec::new();
        let mut pos = 0;

        loop {
            skip_whitespace(&chars, &mut pos);
            if pos >= chars.len() {
                break;
            }

            let key_start = pos;
            while pos < chars.len() && chars[pos] != ':' {
                pos += 1;
            }
            if pos >= chars.len() {
                return Err(fail("expected ':' after key"));
            }
            let key: String = chars[key_start..pos].iter().collect::<String>().trim().to_string();
            validate_identifier("condition key", &key)?;
            pos += 1;

            skip_whitespace(&chars, &mut pos);
            let (value, quoted) = match chars.get(pos) {
                Some(&quote) if quote == '\'' || quote == '"' => {
                    pos += 1;
                    let mut value = String::new();
                    loop {
                        match chars.get(pos) {
                            None => return Err(fail("unterminated string")),
                            Some('\\') => {
                                let escaped = chars.get(pos + 1).ok_or_else(|| fail("dangling escape"))?;
                                value.push(*escaped);
                                pos += 2;
                            }
                            Some(&c) if c == quote => {
                                pos += 1;
                                break;
                            }
                            Some(&c) => {
                                value.push(c);
                                pos += 1;
                            }
                        }
                    }
                    (value, true)
                }
                _ => {
                    let start = pos;
                    while pos < chars.len() && chars[pos] != ',' {
                        pos += 1;
                    }
                    let value = chars[start..pos].iter().collect::<String>().trim().to_string();
                    if value.is_empty() {
                        return Err(fail("missing value"));
                    }
                    (value, false)
                }
            };
            terms.push(ConditionTerm { key, value, quoted });

            skip_whitespace(&chars, &mut pos);
            match chars.get(pos) {
                None => break,
                Some(',') => pos += 1,
                Some(_) => return Err(fail("expected ',' between terms")),
            }
        }

        Ok((!terms.is_empty()).then_some(Self { terms }))
    }

    /// Resolve every term value against a row.
    pub fn resolve(&self, fields: &[&str]) -> Result<IdentityCondition, TemplateError> {
        let mut condition = IdentityCondition::new();
        for term in &self.terms {
            let resolved = resolve(&term.value, fields)?;
            let value = if term.quoted {
                PropertyValue::String(resolved)
            } else {
                PropertyValue::parse_literal(&resolved).ok_or_else(|| {
                    TemplateError::InvalidLiteral {
                        key: term.key.clone(),
                        value: resolved.clone(),
                    }
                })?
            };
            condition.push(term.key.clone(), value);
        }
        Ok(condition)
    }
}

fn skip_whitespace(chars: &[char], pos: &mut usize) {
    while *pos < chars.len() && chars[*pos].is_whitespace() {
        *pos += 1;
    }
}
