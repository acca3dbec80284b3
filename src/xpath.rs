//! Element documents.
//!
//! A small read-only DOM built with `quick-xml` and an evaluator for the
//! location paths element documents are queried with:
//!
//! * absolute and relative paths, `/` and `//` separators
//! * `child::`, `attribute::` (`@`), `descendant::`, `descendant-or-self::`
//!   and `self::` axes, and `.`
//! * name tests with prefixes resolved through the namespaces declared on
//!   the root element, `*`, `text()`, `node()`
//! * predicates `[n]`, `[@a='v']`, `[child='v']`, `[text()='v']`, `[@a]`
//!
//! Results are returned as strings: the string value of elements, the text
//! of text nodes and the value of attributes.

use std::collections::BTreeMap;
use std::io::Cursor;

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::error::{RestreeError, Result};

#[derive(Parser)]
#[grammar = "xpath.pest"]
struct PathParser;

impl From<pest::error::Error<Rule>> for RestreeError {
    fn from(e: pest::error::Error<Rule>) -> Self {
        RestreeError::parse(e.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Node {
    /// Qualified name as written.
    pub name: String,
    pub local: String,
    pub namespace: Option<String>,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Content>,
}

#[derive(Debug, Clone)]
pub enum Content {
    Element(Node),
    Text(String),
}

impl Node {
    fn elements(&self) -> impl Iterator<Item = &Node> {
        self.children.iter().filter_map(|c| match c {
            Content::Element(node) => Some(node),
            Content::Text(_) => None,
        })
    }

    fn texts(&self) -> impl Iterator<Item = &str> {
        self.children.iter().filter_map(|c| match c {
            Content::Text(text) => Some(text.as_str()),
            Content::Element(_) => None,
        })
    }

    /// Concatenated text of the node and its descendants.
    pub fn string_value(&self) -> String {
        let mut value = String::new();
        for child in &self.children {
            match child {
                Content::Text(text) => value.push_str(text),
                Content::Element(node) => value.push_str(&node.string_value()),
            }
        }
        value
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn descendants<'a>(&'a self, found: &mut Vec<&'a Node>) {
        for node in self.elements() {
            found.push(node);
            node.descendants(found);
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    // virtual node holding the root element
    top: Node,
    namespaces: BTreeMap<String, String>,
}

fn open_element(
    start: &BytesStart,
    scopes: &mut Vec<BTreeMap<String, String>>,
) -> Result<Node> {
    let mut scope = scopes.last().cloned().unwrap_or_default();
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value()?.into_owned();
        if key == "xmlns" {
            scope.insert(String::new(), value);
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.insert(prefix.to_string(), value);
        } else {
            attributes.push((key, value));
        }
    }
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let (prefix, local) = name.split_once(':').unwrap_or(("", name.as_str()));
    let node = Node {
        namespace: scope.get(prefix).cloned(),
        local: local.to_string(),
        name: name.clone(),
        attributes,
        children: Vec::new(),
    };
    scopes.push(scope);
    Ok(node)
}

impl Document {
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<Node> = Vec::new();
        let mut scopes: Vec<BTreeMap<String, String>> = Vec::new();
        let mut root: Option<Node> = None;
        let mut namespaces = BTreeMap::new();

        let attach = |node: Node, stack: &mut Vec<Node>, root: &mut Option<Node>| {
            match stack.last_mut() {
                Some(parent) => parent.children.push(Content::Element(node)),
                None if root.is_none() => *root = Some(node),
                None => {}
            }
        };

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    let node = open_element(&start, &mut scopes)?;
                    if stack.is_empty() && root.is_none() {
                        namespaces = scopes.last().cloned().unwrap_or_default();
                    }
                    stack.push(node);
                }
                Event::Empty(start) => {
                    let node = open_element(&start, &mut scopes)?;
                    if stack.is_empty() && root.is_none() {
                        namespaces = scopes.last().cloned().unwrap_or_default();
                    }
                    scopes.pop();
                    attach(node, &mut stack, &mut root);
                }
                Event::End(_) => {
                    scopes.pop();
                    if let Some(node) = stack.pop() {
                        attach(node, &mut stack, &mut root);
                    }
                }
                Event::Text(text) => {
                    let text = text.unescape()?;
                    if !text.trim().is_empty() {
                        if let Some(node) = stack.last_mut() {
                            node.children.push(Content::Text(text.into_owned()));
                        }
                    }
                }
                Event::CData(data) => {
                    if let Some(node) = stack.last_mut() {
                        node.children
                            .push(Content::Text(String::from_utf8_lossy(&data).into_owned()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        let root = root.ok_or_else(|| RestreeError::parse("document has no root element"))?;
        Ok(Self {
            top: Node {
                children: vec![Content::Element(root)],
                ..Node::default()
            },
            namespaces,
        })
    }

    pub fn root(&self) -> Option<&Node> {
        self.top.elements().next()
    }

    /// Prefix to namespace URI, as declared on the root element.
    pub fn namespaces(&self) -> &BTreeMap<String, String> {
        &self.namespaces
    }

    pub fn evaluate(&self, expression: &str) -> Result<Vec<String>> {
        let parsed = PathParser::parse(Rule::expression, expression)?
            .next()
            .and_then(|e| e.into_inner().next())
            .ok_or_else(|| RestreeError::parse(format!("empty path '{expression}'")))?;
        let root = self
            .root()
            .ok_or_else(|| RestreeError::parse("document has no root element"))?;
        if parsed.as_rule() == Rule::root_only {
            return Ok(vec![root.string_value()]);
        }

        let pairs: Vec<Pair<Rule>> = parsed.into_inner().collect();
        let absolute = matches!(pairs.first().map(|p| p.as_rule()), Some(Rule::descend | Rule::child));
        let mut context: Vec<Item> = vec![Item::Element(if absolute { &self.top } else { root })];
        let mut descend = false;
        for pair in pairs {
            match pair.as_rule() {
                Rule::descend => descend = true,
                Rule::child => descend = false,
                Rule::step => {
                    context = self.step(&context, pair, descend)?;
                    descend = false;
                }
                _ => {}
            }
        }
        Ok(context.iter().map(Item::string_value).collect())
    }

    fn name_matches(&self, qname: &str, node: &Node) -> Result<bool> {
        match qname.split_once(':') {
            Some((prefix, local)) => {
                let namespace = self.namespaces.get(prefix).ok_or_else(|| {
                    RestreeError::Programming(format!("undeclared namespace prefix '{prefix}'"))
                })?;
                Ok(node.namespace.as_deref() == Some(namespace.as_str()) && node.local == local)
            }
            None => Ok(node.local == qname),
        }
    }

    fn step<'a>(&'a self, context: &[Item<'a>], step: Pair<Rule>, descend: bool) -> Result<Vec<Item<'a>>> {
        let mut bases: Vec<&'a Node> = Vec::new();
        for item in context {
            if let Item::Element(node) = item {
                bases.push(node);
                if descend {
                    node.descendants(&mut bases);
                }
            }
        }

        let mut axis = Axis::Child;
        let mut test: Option<Pair<Rule>> = None;
        let mut predicates: Vec<Pair<Rule>> = Vec::new();
        for part in step.into_inner() {
            match part.as_rule() {
                Rule::self_step => {
                    let items: Vec<Item> = bases.into_iter().map(Item::Element).collect();
                    return Ok(dedup(items));
                }
                Rule::axis => axis = Axis::parse(part.as_str()),
                Rule::node_test => test = part.into_inner().next(),
                Rule::predicate => predicates.push(part),
                _ => {}
            }
        }
        let test = test.ok_or_else(|| RestreeError::parse("step without node test"))?;

        let mut selected = Vec::new();
        for base in bases {
            let mut candidates = self.candidates(base, axis, &test)?;
            for predicate in &predicates {
                candidates = self.filter(candidates, predicate.clone())?;
            }
            selected.extend(candidates);
        }
        Ok(dedup(selected))
    }

    fn candidates<'a>(&'a self, base: &'a Node, axis: Axis, test: &Pair<Rule>) -> Result<Vec<Item<'a>>> {
        let mut items = Vec::new();
        if axis == Axis::Attribute {
            for (key, value) in &base.attributes {
                let matched = match test.as_rule() {
                    Rule::wildcard | Rule::node_any => true,
                    Rule::qname => {
                        let local = key.split_once(':').map(|(_, l)| l).unwrap_or(key);
                        key == test.as_str() || local == test.as_str()
                    }
                    _ => false,
                };
                if matched {
                    items.push(Item::Attribute(value));
                }
            }
            return Ok(items);
        }

        let nodes: Vec<&Node> = match axis {
            Axis::Child => base.elements().collect(),
            Axis::SelfNode => vec![base],
            Axis::Descendant | Axis::DescendantOrSelf => {
                let mut found = Vec::new();
                if axis == Axis::DescendantOrSelf {
                    found.push(base);
                }
                base.descendants(&mut found);
                found
            }
            Axis::Attribute => Vec::new(),
        };
        match test.as_rule() {
            Rule::text_test | Rule::node_any => {
                let owners: Vec<&Node> = if axis == Axis::Child { vec![base] } else { nodes.clone() };
                if test.as_rule() == Rule::node_any {
                    items.extend(nodes.iter().copied().map(Item::Element));
                }
                for owner in owners {
                    items.extend(owner.texts().map(Item::Text));
                }
            }
            Rule::wildcard => items.extend(nodes.iter().map(|n| Item::Element(n))),
            Rule::qname => {
                for node in nodes {
                    if self.name_matches(test.as_str(), node)? {
                        items.push(Item::Element(node));
                    }
                }
            }
            _ => {}
        }
        Ok(items)
    }

    fn filter<'a>(&'a self, candidates: Vec<Item<'a>>, predicate: Pair<Rule>) -> Result<Vec<Item<'a>>> {
        let Some(condition) = predicate.into_inner().next() else {
            return Ok(candidates);
        };
        match condition.as_rule() {
            Rule::position => {
                let position: usize = condition
                    .as_str()
                    .parse()
                    .map_err(|_| RestreeError::parse(format!("bad position '{}'", condition.as_str())))?;
                Ok(candidates
                    .into_iter()
                    .nth(position.wrapping_sub(1))
                    .into_iter()
                    .collect())
            }
            Rule::comparison => {
                let mut parts = condition.into_inner();
                let operand = parts
                    .next()
                    .ok_or_else(|| RestreeError::parse("comparison without operand"))?;
                let literal = parts
                    .next()
                    .map(|l| unquote(l.as_str()))
                    .ok_or_else(|| RestreeError::parse("comparison without literal"))?;
                let mut kept = Vec::new();
                for item in candidates {
                    if self.operand_values(&item, &operand)?.iter().any(|v| *v == literal) {
                        kept.push(item);
                    }
                }
                Ok(kept)
            }
            Rule::existence => {
                let operand = condition
                    .into_inner()
                    .next()
                    .ok_or_else(|| RestreeError::parse("predicate without operand"))?;
                let mut kept = Vec::new();
                for item in candidates {
                    if !self.operand_values(&item, &operand)?.is_empty() {
                        kept.push(item);
                    }
                }
                Ok(kept)
            }
            _ => Ok(candidates),
        }
    }

    fn operand_values(&self, item: &Item, operand: &Pair<Rule>) -> Result<Vec<String>> {
        let Some(kind) = operand.clone().into_inner().next() else {
            return Ok(Vec::new());
        };
        let node = match item {
            Item::Element(node) => *node,
            Item::Text(text) | Item::Attribute(text) => {
                return Ok(match kind.as_rule() {
                    Rule::context_ref => vec![text.to_string()],
                    _ => Vec::new(),
                });
            }
        };
        Ok(match kind.as_rule() {
            Rule::attribute_ref => {
                let name = kind.into_inner().next().map(|q| q.as_str()).unwrap_or_default();
                node.attribute(name).map(|v| vec![v.to_string()]).unwrap_or_default()
            }
            Rule::text_test => node.texts().map(str::to_string).collect(),
            Rule::context_ref => vec![node.string_value()],
            Rule::qname => {
                let mut values = Vec::new();
                for child in node.elements() {
                    if self.name_matches(kind.as_str(), child)? {
                        values.push(child.string_value());
                    }
                }
                values
            }
            _ => Vec::new(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Attribute,
    Descendant,
    DescendantOrSelf,
    SelfNode,
}

impl Axis {
    fn parse(text: &str) -> Self {
        match text {
            "attribute::" | "@" => Axis::Attribute,
            "descendant::" => Axis::Descendant,
            "descendant-or-self::" => Axis::DescendantOrSelf,
            "self::" => Axis::SelfNode,
            _ => Axis::Child,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Item<'a> {
    Element(&'a Node),
    Text(&'a str),
    Attribute(&'a str),
}

impl Item<'_> {
    fn string_value(&self) -> String {
        match self {
            Item::Element(node) => node.string_value(),
            Item::Text(text) | Item::Attribute(text) => text.to_string(),
        }
    }

    fn same(&self, other: &Item) -> bool {
        match (self, other) {
            (Item::Element(a), Item::Element(b)) => std::ptr::eq(*a, *b),
            (Item::Text(a), Item::Text(b)) | (Item::Attribute(a), Item::Attribute(b)) => {
                std::ptr::eq(a.as_ptr(), b.as_ptr()) && a.len() == b.len()
            }
            _ => false,
        }
    }
}

fn dedup(items: Vec<Item>) -> Vec<Item> {
    let mut unique: Vec<Item> = Vec::with_capacity(items.len());
    for item in items {
        if !unique.iter().any(|u| u.same(&item)) {
            unique.push(item);
        }
    }
    unique
}

/// Quotes `text` as a string literal. Literals have no escapes, so text
/// holding both quote characters cannot be expressed.
pub fn quote(text: &str) -> Result<String> {
    if !text.contains('\'') {
        Ok(format!("'{text}'"))
    } else if !text.contains('"') {
        Ok(format!("\"{text}\""))
    } else {
        Err(RestreeError::Data(format!(
            "'{text}' holds both quote characters and cannot be matched"
        )))
    }
}

fn unquote(literal: &str) -> String {
    literal
        .strip_prefix(['\'', '"'])
        .and_then(|l| l.strip_suffix(['\'', '"']))
        .unwrap_or(literal)
        .to_string()
}

/// Sets the `label` attribute of the root element, leaving the rest of the
/// document byte for byte.
pub fn relabel_root(xml: &str, label: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut relabelled = false;
    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(start) if !relabelled => {
                writer.write_event(Event::Start(with_label(&start, label)?))?;
                relabelled = true;
            }
            Event::Empty(start) if !relabelled => {
                writer.write_event(Event::Empty(with_label(&start, label)?))?;
                relabelled = true;
            }
            event => writer.write_event(event)?,
        }
    }
    if !relabelled {
        return Err(RestreeError::parse("document has no root element"));
    }
    String::from_utf8(writer.into_inner().into_inner()).map_err(|e| RestreeError::parse(e.to_string()))
}

fn with_label(start: &BytesStart, label: &str) -> Result<BytesStart<'static>> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut relabelled = BytesStart::new(name);
    for attribute in start.attributes() {
        let attribute = attribute?;
        if attribute.key.as_ref() != b"label" {
            relabelled.push_attribute(attribute);
        }
    }
    relabelled.push_attribute(("label", label));
    Ok(relabelled)
}
