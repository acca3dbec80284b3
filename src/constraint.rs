//! Search constraints and their rewriting across entity types.
//!
//! A [`Filter`] is a list of terms closed by the junction that combines
//! them: `[(a, =, 1), (b, =, 2), AND]`. Terms are criteria or nested
//! filters. Constraints can be given directly, in postfix text
//! (`a = 1 b = 2 AND`), or as a saved search or search template on the
//! server; [`normalize`] brings all of them to a [`Filter`].
//!
//! [`rewrite_query`] turns a filter over arbitrary datatypes into a filter
//! over a join field (the subject ID), so that one search on the join
//! entity answers it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use serde_json::Value;
use tracing::debug;

use crate::error::{RestreeError, Result};
use crate::interface::Interface;
use crate::search;
use crate::transport::Row;

pub const SUBJECT_JOIN_FIELD: &str = "xnat:subjectData/SUBJECT_ID";
pub const SUBJECT_COMMON_FIELD: &str = "SUBJECT_ID";
pub const SUBJECT_RETURN_VALUES: [&str; 2] =
    ["xnat:subjectData/PROJECT", "xnat:subjectData/SUBJECT_ID"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Criterion {
    pub field: String,
    pub comparison: String,
    pub value: String,
}

impl Criterion {
    pub fn new(field: &str, comparison: &str, value: &str) -> Self {
        Self {
            field: field.to_string(),
            comparison: comparison.to_string(),
            value: value.to_string(),
        }
    }
    /// The datatype a field such as `xnat:subjectData/AGE` belongs to.
    pub fn datatype(&self) -> &str {
        self.field.split('/').next().unwrap_or(&self.field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Junction {
    And,
    Or,
}

impl Junction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Junction::And => "AND",
            Junction::Or => "OR",
        }
    }
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "AND" => Some(Junction::And),
            "OR" => Some(Junction::Or),
            _ => None,
        }
    }
}

impl fmt::Display for Junction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Criterion(Criterion),
    Group(Filter),
    Junction(Junction),
}

impl Term {
    pub fn criterion(field: &str, comparison: &str, value: &str) -> Self {
        Term::Criterion(Criterion::new(field, comparison, value))
    }
    pub fn and() -> Self {
        Term::Junction(Junction::And)
    }
    pub fn or() -> Self {
        Term::Junction(Junction::Or)
    }
}

pub type Filter = Vec<Term>;

/// The ways constraints can be handed to `Collection::where_`.
#[derive(Debug, Clone)]
pub enum Query {
    Constraints(Filter),
    /// Postfix text.
    Text(String),
    /// A search template with `%(key)s` placeholders.
    Template {
        name: String,
        params: BTreeMap<String, String>,
    },
    /// A saved search.
    Stored(String),
}

/// The junction of a filter, `AND` when none is given.
pub fn junction_of(filter: &[Term]) -> Junction {
    filter
        .iter()
        .rev()
        .find_map(|term| match term {
            Term::Junction(j) => Some(*j),
            _ => None,
        })
        .unwrap_or(Junction::And)
}

// ------------- Text -------------
#[derive(Parser)]
#[grammar = "constraint.pest"]
struct ConstraintParser;

impl From<pest::error::Error<Rule>> for RestreeError {
    fn from(e: pest::error::Error<Rule>) -> Self {
        RestreeError::parse(e.to_string())
    }
}

fn token_text(pair: Pair<Rule>) -> String {
    let text = pair.into_inner().next().map(|p| p.as_str()).unwrap_or_default();
    let inner = match pair_kind(text) {
        Some(quote) => text.trim_start_matches(quote).trim_end_matches(quote),
        None => text,
    };
    inner.to_string()
}

fn pair_kind(text: &str) -> Option<char> {
    let first = text.chars().next()?;
    if (first == '\'' || first == '"') && text.len() >= 2 && text.ends_with(first) {
        Some(first)
    } else {
        None
    }
}

/// Parses postfix constraints. Every junction groups everything pending
/// before it; criteria left over at the end are joined with `AND`.
pub fn parse_text(text: &str) -> Result<Filter> {
    let expression = ConstraintParser::parse(Rule::expression, text)?
        .next()
        .ok_or_else(|| RestreeError::parse("empty constraint expression"))?;
    let mut pending: Filter = Vec::new();
    for pair in expression.into_inner() {
        match pair.as_rule() {
            Rule::junction => {
                let junction = Junction::parse(pair.as_str())
                    .ok_or_else(|| RestreeError::parse(format!("bad junction '{}'", pair.as_str())))?;
                if pending.is_empty() {
                    return Err(RestreeError::Programming(format!(
                        "junction {junction} has nothing to join"
                    )));
                }
                let mut group = std::mem::take(&mut pending);
                group.push(Term::Junction(junction));
                pending.push(Term::Group(group));
            }
            Rule::criterion => {
                let mut parts = pair.into_inner().map(|part| {
                    part.into_inner().next().map(token_text).unwrap_or_default()
                });
                let field = parts.next().unwrap_or_default();
                let comparison = parts.next().unwrap_or_default();
                let value = parts.next().unwrap_or_default();
                pending.push(Term::criterion(&field, &comparison, &value));
            }
            _ => {}
        }
    }
    match pending.len() {
        0 => Err(RestreeError::Programming("no constraints given".into())),
        1 => match pending.pop() {
            Some(Term::Group(filter)) => Ok(filter),
            Some(other) => Ok(vec![other, Term::and()]),
            None => Err(RestreeError::Programming("no constraints given".into())),
        },
        _ => {
            pending.push(Term::and());
            Ok(pending)
        }
    }
}

// ------------- JSON -------------
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn term_from_json(value: &Value) -> Result<Term> {
    match value {
        Value::String(token) => Junction::parse(token)
            .map(Term::Junction)
            .ok_or_else(|| RestreeError::Programming(format!("invalid filter token '{token}'"))),
        Value::Array(items) => {
            let is_triple = items.len() == 3
                && items.iter().all(|item| scalar(item).is_some())
                && !matches!(&items[0], Value::String(s) if Junction::parse(s).is_some());
            if is_triple {
                let parts: Vec<String> = items.iter().filter_map(scalar).collect();
                Ok(Term::criterion(&parts[0], &parts[1], &parts[2]))
            } else {
                Ok(Term::Group(filter_from_values(items)?))
            }
        }
        Value::Object(fields) => {
            let get = |key: &str| fields.get(key).and_then(scalar);
            match (get("field"), get("comparison"), get("value")) {
                (Some(field), Some(comparison), Some(value)) => {
                    Ok(Term::criterion(&field, &comparison, &value))
                }
                _ => Err(RestreeError::Programming(format!("invalid filter object {value}"))),
            }
        }
        other => Err(RestreeError::Programming(format!("invalid filter term {other}"))),
    }
}

fn filter_from_values(items: &[Value]) -> Result<Filter> {
    items.iter().map(term_from_json).collect()
}

/// Decodes a nested JSON list such as
/// `[["xnat:subjectData/AGE", ">", "30"], "AND"]`.
pub fn from_json(text: &str) -> Result<Filter> {
    match serde_json::from_str::<Value>(text)? {
        Value::Array(items) => filter_from_values(&items),
        other => Err(RestreeError::Programming(format!("filter must be a list, got {other}"))),
    }
}

// ------------- Normalization -------------
/// Each filter must close with exactly one junction and hold at least one
/// criterion somewhere.
pub fn validate(filter: &[Term]) -> Result<()> {
    let junctions = filter.iter().filter(|t| matches!(t, Term::Junction(_))).count();
    if junctions > 1 {
        return Err(RestreeError::Programming("more than one junction in a filter".into()));
    }
    if junctions == 1 && !matches!(filter.last(), Some(Term::Junction(_))) {
        return Err(RestreeError::Programming("the junction must close its filter".into()));
    }
    for term in filter {
        if let Term::Group(group) = term {
            validate(group)?;
        }
    }
    Ok(())
}

/// Brings any [`Query`] to a validated, non-empty [`Filter`].
pub fn normalize(intf: &Interface, query: &Query) -> Result<Filter> {
    let filter = match query {
        Query::Constraints(filter) => filter.clone(),
        Query::Text(text) => parse_text(text)?,
        Query::Template { name, params } => {
            let document = search::template(intf, name, params)?;
            search::query_from_xml(&document)?.constraints
        }
        Query::Stored(name) => {
            let document = search::saved_search(intf, name)?;
            search::query_from_xml(&document)?.constraints
        }
    };
    if !has_criteria(&filter) {
        return Err(RestreeError::Programming(
            "one of constraints, template or stored query must be set".into(),
        ));
    }
    validate(&filter)?;
    Ok(filter)
}

pub fn has_criteria(filter: &[Term]) -> bool {
    filter.iter().any(|term| match term {
        Term::Criterion(_) => true,
        Term::Group(group) => has_criteria(group),
        Term::Junction(_) => false,
    })
}

/// Datatypes the criteria of a filter refer to, in order of appearance.
pub fn datatypes(filter: &[Term]) -> Vec<String> {
    let mut found = Vec::new();
    for term in filter {
        match term {
            Term::Criterion(c) => found.push(c.datatype().to_string()),
            Term::Group(group) => found.extend(datatypes(group)),
            Term::Junction(_) => {}
        }
    }
    found
}

/// Drops the groups that can match nothing. `None` when the whole filter
/// can match nothing.
pub fn prune(filter: &[Term]) -> Option<Filter> {
    let junction = junction_of(filter);
    let mut kept = Vec::with_capacity(filter.len());
    for term in filter {
        match term {
            Term::Criterion(_) => kept.push(term.clone()),
            Term::Group(group) => match prune(group) {
                Some(group) => kept.push(Term::Group(group)),
                None if junction == Junction::And => return None,
                None => {}
            },
            Term::Junction(_) => {}
        }
    }
    if kept.is_empty() {
        return None;
    }
    kept.push(Term::Junction(junction));
    Some(kept)
}

// ------------- Rewriting -------------
/// Replaces every criterion by the disjunction of `join_field = v` over the
/// values `v` of `common_field` found by searching the criterion's datatype
/// with that criterion alone.
pub fn rewrite_query(
    intf: &Interface,
    join_field: &str,
    common_field: &str,
    filter: &[Term],
) -> Result<Filter> {
    let key = common_field.to_lowercase();
    let mut rewritten = Vec::with_capacity(filter.len());
    for term in filter {
        match term {
            Term::Group(group) => {
                rewritten.push(Term::Group(rewrite_query(intf, join_field, common_field, group)?))
            }
            Term::Criterion(criterion) => {
                let datatype = criterion.datatype();
                let column = format!("{datatype}/{common_field}");
                let rows = search::search(
                    intf,
                    datatype,
                    &[column.as_str()],
                    &[Term::Criterion(criterion.clone()), Term::and()],
                )?;
                let mut disjunction: Filter = rows
                    .iter()
                    .filter_map(|row| row.get(&key))
                    .map(|value| Term::criterion(join_field, "=", value))
                    .collect();
                debug!(
                    "{} {} {} matched {} join values",
                    criterion.field,
                    criterion.comparison,
                    criterion.value,
                    disjunction.len()
                );
                disjunction.push(Term::or());
                rewritten.push(Term::Group(disjunction));
            }
            Term::Junction(junction) => rewritten.push(Term::Junction(*junction)),
        }
    }
    Ok(rewritten)
}

/// Rewrites `filter` onto `join_field` and searches the join entity for
/// `return_values`.
pub fn query_with(
    intf: &Interface,
    join_field: &str,
    common_field: &str,
    return_values: &[&str],
    filter: &[Term],
) -> Result<Vec<Row>> {
    let root = join_field.split('/').next().unwrap_or(join_field);
    let rewritten = rewrite_query(intf, join_field, common_field, filter)?;
    match prune(&rewritten) {
        Some(rewritten) => search::search(intf, root, return_values, &rewritten),
        None => Ok(Vec::new()),
    }
}

/// Subject URIs of the rows returned for [`SUBJECT_RETURN_VALUES`], each
/// once, in the order first seen.
pub fn subject_uris(entry_point: &str, rows: &[Row]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    rows.iter()
        .filter_map(|row| {
            let project = row.get("project")?;
            let subject = row.get("subject_id")?;
            Some(format!("{entry_point}/projects/{project}/subjects/{subject}"))
        })
        .filter(|uri| seen.insert(uri.clone()))
        .collect()
}
