//! Resource collections.
//!
//! A [`Collection`] addresses zero or more elements. It is built from one of
//! five bases (a URI template, element URIs, elements, another collection or
//! several collections) and whatever the base, iterating it yields
//! [`Element`]s. Iteration is lazy: a template base costs one tabular query
//! per pass, and a nested collection one more query per parent element.
//!
//! Nothing is kept between passes except what the learned-schema cache
//! picks up along the way.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::Timelike;
use tracing::{debug, warn};

use crate::constraint::{self, Query};
use crate::element::Element;
use crate::error::{RestreeError, Result};
use crate::interface::Interface;
use crate::learned;
use crate::registry::CollectionAccessor;
use crate::transport::Row;
use crate::uri;

// ------------- Configuration -------------
#[derive(Debug, Clone)]
pub enum CollectionBase {
    Template(String),
    Uris(Vec<String>),
    Elements(Vec<Element>),
    Collection(Box<Collection>),
    Collections(Vec<Collection>),
}

/// Which listing column identifies the members.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdField {
    #[default]
    Id,
    Label,
    Column(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    One(String),
    /// Sent comma-joined.
    Many(Vec<String>),
}

impl FilterValue {
    fn render(&self) -> String {
        match self {
            FilterValue::One(value) => value.clone(),
            FilterValue::Many(values) => values.join(","),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::One(value.to_string())
    }
}
impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::One(value)
    }
}
impl From<Vec<String>> for FilterValue {
    fn from(values: Vec<String>) -> Self {
        FilterValue::Many(values)
    }
}
impl From<&[&str]> for FilterValue {
    fn from(values: &[&str]) -> Self {
        FilterValue::Many(values.iter().map(|v| v.to_string()).collect())
    }
}

/// Field requested from [`Collection::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    Label,
    Element,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Element(Element),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Identifiers(Vec<String>),
    /// One field was requested.
    Single(Vec<FieldValue>),
    Tuples(Vec<Vec<FieldValue>>),
}

#[derive(Clone)]
pub struct Collection {
    base: CollectionBase,
    intf: Interface,
    pattern: String,
    id_field: IdField,
    columns: Vec<String>,
    filters: BTreeMap<String, FilterValue>,
    nested: Option<String>,
    node: Option<String>,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("base", &self.base)
            .field("pattern", &self.pattern)
            .field("id_field", &self.id_field)
            .field("nested", &self.nested)
            .field("node", &self.node)
            .finish()
    }
}

impl Collection {
    fn with_base(base: CollectionBase, intf: &Interface) -> Self {
        Self {
            base,
            intf: intf.clone(),
            pattern: uri::WILDCARD.to_string(),
            id_field: IdField::Id,
            columns: Vec::new(),
            filters: BTreeMap::new(),
            nested: None,
            node: None,
        }
    }
    pub fn from_template(template: &str, intf: &Interface) -> Self {
        let mut collection = Self::with_base(CollectionBase::Template(template.to_string()), intf);
        collection.node = template_node(template);
        collection
    }
    pub fn from_uris(uris: Vec<String>, intf: &Interface) -> Self {
        Self::with_base(CollectionBase::Uris(uris), intf)
    }
    pub fn from_elements(elements: Vec<Element>, intf: &Interface) -> Self {
        Self::with_base(CollectionBase::Elements(elements), intf)
    }
    pub fn from_collection(collection: Collection) -> Self {
        let intf = collection.intf.clone();
        Self::with_base(CollectionBase::Collection(Box::new(collection)), &intf)
    }
    pub fn from_collections(collections: Vec<Collection>, intf: &Interface) -> Self {
        Self::with_base(CollectionBase::Collections(collections), intf)
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.pattern = pattern.to_string();
        self
    }
    pub fn with_id_field(mut self, id_field: IdField) -> Self {
        self.id_field = id_field;
        self
    }
    pub fn with_columns<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.columns = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }
    pub fn with_filter(mut self, key: &str, value: impl Into<FilterValue>) -> Self {
        self.filters.insert(key.to_string(), value.into());
        self
    }
    /// Every member expands into its `child` collection. On a template
    /// base the pattern filters the listed parents as well as their
    /// children.
    pub fn with_nested(mut self, child: &str) -> Self {
        self.nested = Some(child.to_string());
        self
    }

    /// Declares the node name of the members, so that an empty base still
    /// knows what it would hold.
    pub fn with_node(mut self, node: &str) -> Self {
        self.node = Some(node.to_string());
        self
    }

    pub fn base(&self) -> &CollectionBase {
        &self.base
    }
    pub fn interface(&self) -> &Interface {
        &self.intf
    }
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
    pub fn id_field(&self) -> &IdField {
        &self.id_field
    }
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
    pub fn filters(&self) -> &BTreeMap<String, FilterValue> {
        &self.filters
    }
    pub fn nested(&self) -> Option<&str> {
        self.nested.as_deref()
    }

    /// Node name of the elements this collection yields, when it can be
    /// told without a query. Only an undeclared empty base has none.
    pub fn node_name(&self) -> Option<String> {
        if let Some(name) = self.nested.as_ref().or(self.node.as_ref()) {
            return Some(name.clone());
        }
        match &self.base {
            CollectionBase::Template(template) => template_node(template),
            CollectionBase::Uris(uris) => uris.first().and_then(|u| uri::next_to_last(u).ok()),
            CollectionBase::Elements(elements) => {
                elements.first().map(|e| e.node_name().to_string())
            }
            CollectionBase::Collection(inner) => inner.node_name(),
            CollectionBase::Collections(inner) => inner.iter().find_map(|c| c.node_name()),
        }
    }

    fn id_header(&self, node: &str) -> String {
        let schema = self.intf.schema();
        match &self.id_field {
            IdField::Id => schema.id_field(node).to_string(),
            IdField::Label => schema.label_field(node).to_string(),
            IdField::Column(column) => column.clone(),
        }
    }

    // ------------- Tabular fetch -------------
    /// One listing query for a template base. Returns the encoded base URI
    /// and the rows.
    fn fetch(&self, template: &str, id_header: &str) -> Result<(String, Vec<Row>)> {
        let intf = &self.intf;
        let entry = intf.entry_point();
        let target = uri::encode(&uri::translate(template, entry));
        let relative = uri::relative(&target, entry).to_string();
        let request_shape = uri::shape(&uri::join(&relative, &["0"]));
        let node = template_node(&target).unwrap_or_default();
        let cache = intf.learned();
        let settings = intf.settings();
        let gather = intf.schema().is_gatherable(&node);
        let learn = gather
            && (!cache.has_snapshot(&request_shape)
                || learned::tick_fires(
                    chrono::Utc::now().second(),
                    settings.learn_tick,
                    settings.auto_learn,
                ));

        let mut columns: Vec<&str> = vec![id_header];
        for column in &self.columns {
            if !columns.contains(&column.as_str()) {
                columns.push(column);
            }
        }
        if learn && !columns.contains(&"xsiType") {
            columns.push("xsiType");
        }
        let mut query = format!("{}?format=json&columns={}", target, columns.join(","));
        for (key, value) in &self.filters {
            query.push('&');
            query.push_str(key);
            query.push('=');
            query.push_str(&value.render());
        }

        let mut rows = intf.get_json(&query)?;
        if learn {
            for row in rows.iter_mut() {
                if !row.contains_key("URI") {
                    if let Some(id) = row.get(id_header).cloned() {
                        row.insert("URI".to_string(), uri::join(&target, &[&id]));
                    }
                }
            }
            if let Err(e) = cache.learn(&node, &rows, &request_shape, entry) {
                warn!("could not learn subtypes of {}: {}", request_shape, e);
            }
        }
        Ok((target, rows))
    }

    // ------------- Iteration -------------
    pub fn iter(&self) -> Elements {
        Elements::new(self.clone(), true)
    }

    fn iter_quiet(&self) -> Elements {
        Elements::new(self.clone(), false)
    }

    /// Collection of `child` under one member, configured like this one.
    fn expand(&self, element: &Element, child: &str) -> Collection {
        Collection::from_template(&uri::join(element.uri(), &[child]), &self.intf)
            .with_pattern(&self.pattern)
            .with_id_field(self.id_field.clone())
            .with_columns(&self.columns)
    }

    pub fn first(&self) -> Option<Element> {
        self.iter().next()
    }

    /// Every member, or the fault that cut iteration short in debug mode.
    pub fn try_collect(&self) -> Result<Vec<Element>> {
        let mut elements = self.iter();
        let collected: Vec<Element> = elements.by_ref().collect();
        match elements.take_fault() {
            Some(fault) => Err(fault),
            None => Ok(collected),
        }
    }

    /// Materializes the whole collection. Prefer iterating for large ones.
    ///
    /// Without fields, the member identifiers. With one field, a list of
    /// that field; with several, one tuple per member. `Label` lists the
    /// members by label.
    pub fn get(&self, fields: &[Field]) -> Fetched {
        let by_label = fields.contains(&Field::Label) && !fields.contains(&Field::Id);
        let source = if by_label {
            self.clone().with_id_field(IdField::Label)
        } else {
            self.clone()
        };
        if fields.is_empty() {
            return Fetched::Identifiers(source.iter().map(|e| e.name().to_string()).collect());
        }
        let tuples: Vec<Vec<FieldValue>> = source
            .iter()
            .map(|element| {
                fields
                    .iter()
                    .map(|field| match field {
                        Field::Label if !by_label => {
                            // listed by ID, so the label costs one lookup
                            let label = element.label().ok().flatten().unwrap_or_default();
                            FieldValue::Text(label)
                        }
                        Field::Id | Field::Label => FieldValue::Text(element.name().to_string()),
                        Field::Element => FieldValue::Element(element.clone()),
                    })
                    .collect()
            })
            .collect();
        if fields.len() == 1 {
            Fetched::Single(tuples.into_iter().flatten().collect())
        } else {
            Fetched::Tuples(tuples)
        }
    }

    // ------------- Accessors -------------
    /// Invokes the accessor `accessor` of the member node type. Plural
    /// accessors nest `child` under every member, filtered by `argument` as
    /// a pattern; singular ones address child `argument` under every member.
    pub fn child(&self, accessor: &str, argument: &str) -> Result<Collection> {
        let child = self
            .intf
            .schema()
            .plural(accessor)
            .unwrap_or(accessor)
            .to_string();
        let Some(node_name) = self.node_name() else {
            // nothing listed, so nothing below it either
            self.intf.registry().lookup(&child)?;
            return Ok(Collection::from_uris(Vec::new(), &self.intf).with_node(&child));
        };
        let node = self.intf.registry().lookup_or_generic(&node_name);
        Ok(match node.collection_accessor(accessor)? {
            CollectionAccessor::Many(factory) | CollectionAccessor::One(factory) => {
                factory(self, &child, argument)
            }
        })
    }

    pub fn collection(&self, child: &str) -> Result<Collection> {
        self.collection_matching(child, uri::WILDCARD)
    }

    pub fn collection_matching(&self, child: &str, pattern: &str) -> Result<Collection> {
        let plural = self.intf.schema().plural(child).unwrap_or(child).to_string();
        self.child(&plural, pattern)
    }

    /// Child `id` of every member, eagerly addressed.
    pub fn elements(&self, child: &str, id: &str) -> Result<Collection> {
        let singular = self.intf.schema().singular(child).unwrap_or(child).to_string();
        self.child(&singular, id)
    }

    // ------------- Tags -------------
    pub fn tag(&self, name: &str) -> Result<()> {
        let tags = self.intf.tags();
        if !tags.exists(name)? {
            tags.create(name)?;
        }
        let uris: Vec<String> = self.iter().map(|e| e.uri().to_string()).collect();
        tags.reference_many(name, &uris)
    }

    pub fn untag(&self, name: &str) -> Result<()> {
        let tags = self.intf.tags();
        let uris: Vec<String> = self.iter().map(|e| e.uri().to_string()).collect();
        tags.dereference_many(name, &uris)?;
        if tags.references(name)?.is_empty() {
            tags.delete(name)?;
        }
        Ok(())
    }

    // ------------- Constraints -------------
    /// Restricts the collection to members whose subject satisfies `query`.
    ///
    /// The subject-level collection of the chain is replaced by the
    /// qualifying subject URIs, intersected with its own members when it
    /// had an identifier pattern. The receiver is left untouched. Apply it
    /// to the top-most collection of a chain.
    #[doc(alias = "where")]
    pub fn where_(&self, query: &Query) -> Result<Collection> {
        let filter = constraint::normalize(&self.intf, query)?;
        let rows = constraint::query_with(
            &self.intf,
            constraint::SUBJECT_JOIN_FIELD,
            constraint::SUBJECT_COMMON_FIELD,
            &constraint::SUBJECT_RETURN_VALUES,
            &filter,
        )?;
        let subjects = constraint::subject_uris(self.intf.entry_point(), &rows);
        debug!("{} subjects satisfy the constraints", subjects.len());
        self.rebase_subjects(&subjects)?.ok_or_else(|| {
            RestreeError::Programming(
                "constraints need a collection at or below the subject level".into(),
            )
        })
    }

    fn rebase_subjects(&self, subjects: &[String]) -> Result<Option<Collection>> {
        if self.node_name().as_deref() == Some("subjects") {
            let qualifying: Vec<String> = if self.pattern != uri::WILDCARD {
                let members: BTreeSet<String> = self
                    .clone()
                    .with_id_field(IdField::Id)
                    .iter()
                    .map(|e| e.uri().to_string())
                    .collect();
                subjects
                    .iter()
                    .filter(|s| members.contains(&uri::encode(s)))
                    .cloned()
                    .collect()
            } else {
                subjects.to_vec()
            };
            let mut rebased = self.clone();
            rebased.base = CollectionBase::Uris(qualifying);
            rebased.nested = None;
            rebased.node = Some("subjects".to_string());
            return Ok(Some(rebased));
        }
        match &self.base {
            CollectionBase::Collection(inner) => Ok(inner.rebase_subjects(subjects)?.map(|inner| {
                let mut rebased = self.clone();
                rebased.base = CollectionBase::Collection(Box::new(inner));
                rebased
            })),
            CollectionBase::Collections(inner) => {
                let mut any = false;
                let mut rebased_inner = Vec::with_capacity(inner.len());
                for collection in inner {
                    match collection.rebase_subjects(subjects)? {
                        Some(rebased) => {
                            any = true;
                            rebased_inner.push(rebased);
                        }
                        None => rebased_inner.push(collection.clone()),
                    }
                }
                if !any {
                    return Ok(None);
                }
                let mut rebased = self.clone();
                rebased.base = CollectionBase::Collections(rebased_inner);
                Ok(Some(rebased))
            }
            _ => Ok(None),
        }
    }
}

impl IntoIterator for &Collection {
    type Item = Element;
    type IntoIter = Elements;
    fn into_iter(self) -> Elements {
        self.iter()
    }
}

/// Node name listed by a template such as `/data/projects/P1/subjects`.
fn template_node(template: &str) -> Option<String> {
    uri::next_to_last(&uri::join(template, &["0"])).ok()
}

// ------------- Iterator -------------
enum Source {
    Start,
    Rows {
        base: String,
        rows: std::vec::IntoIter<Row>,
        id_header: String,
    },
    Uris(std::vec::IntoIter<String>),
    Listed(std::vec::IntoIter<Element>),
    Inner(Box<Elements>),
    Many {
        rest: std::vec::IntoIter<Collection>,
        current: Option<Box<Elements>>,
    },
    Done,
}

/// Lazy sequence of the elements of a [`Collection`].
pub struct Elements {
    collection: Collection,
    source: Source,
    nested: Option<Box<Elements>>,
    fault: Option<RestreeError>,
    interrupted: bool,
    callbacks: bool,
}

impl Elements {
    fn new(collection: Collection, callbacks: bool) -> Self {
        Self {
            collection,
            source: Source::Start,
            nested: None,
            fault: None,
            interrupted: false,
            callbacks,
        }
    }

    /// The fault that ended iteration early, if any (debug mode only).
    pub fn take_fault(&mut self) -> Option<RestreeError> {
        self.fault.take()
    }

    pub fn was_interrupted(&self) -> bool {
        self.interrupted
    }

    fn stop(&mut self) {
        self.source = Source::Done;
        self.nested = None;
    }

    fn check_interrupt(&mut self) -> bool {
        if self.interrupted {
            return true;
        }
        if self.collection.intf.interrupt().take() {
            debug!("iteration interrupted, reconnecting");
            if let Err(e) = self.collection.intf.reconnect() {
                warn!("reconnection failed: {}", e);
            }
            self.interrupted = true;
            self.stop();
        }
        self.interrupted
    }

    /// Carries the outcome of a finished inner iterator over to this one.
    /// Returns true if this iterator has to stop as well.
    fn absorb(&mut self, mut finished: Elements) -> bool {
        if let Some(fault) = finished.fault.take() {
            self.fault = Some(fault);
            self.stop();
            return true;
        }
        if finished.interrupted {
            self.interrupted = true;
            self.stop();
            return true;
        }
        false
    }

    fn open(&mut self) -> Source {
        match &self.collection.base {
            CollectionBase::Template(template) => {
                let node = template_node(template).unwrap_or_default();
                let id_header = self.collection.id_header(&node);
                match self.collection.fetch(template, &id_header) {
                    Ok((base, rows)) => Source::Rows {
                        base,
                        rows: rows.into_iter(),
                        id_header,
                    },
                    Err(e) if self.collection.intf.is_debug() => {
                        self.fault = Some(e);
                        Source::Done
                    }
                    Err(e) => {
                        warn!("listing {} failed: {}", template, e);
                        Source::Done
                    }
                }
            }
            CollectionBase::Uris(uris) => Source::Uris(uris.clone().into_iter()),
            CollectionBase::Elements(elements) => Source::Listed(elements.clone().into_iter()),
            CollectionBase::Collection(inner) => Source::Inner(Box::new(inner.iter_quiet())),
            CollectionBase::Collections(inner) => Source::Many {
                rest: inner.clone().into_iter(),
                current: None,
            },
        }
    }

    /// Next member of the base, before any nesting.
    fn advance(&mut self) -> Option<Element> {
        loop {
            match &mut self.source {
                Source::Start => self.source = self.open(),
                Source::Done => return None,
                Source::Rows { base, rows, id_header } => {
                    let Some(row) = rows.next() else {
                        self.source = Source::Done;
                        return None;
                    };
                    let Some(id) = row.get(id_header.as_str()) else {
                        continue;
                    };
                    let id = uri::decode(id);
                    if !uri::matches_glob(&self.collection.pattern, &id) {
                        continue;
                    }
                    let uri = uri::join(base, &[&id]);
                    return Some(Element::new(&uri, &self.collection.intf));
                }
                Source::Uris(uris) => match uris.next() {
                    Some(uri) => return Some(Element::new(&uri, &self.collection.intf)),
                    None => self.source = Source::Done,
                },
                Source::Listed(elements) => match elements.next() {
                    Some(element) => return Some(element),
                    None => self.source = Source::Done,
                },
                Source::Inner(inner) => {
                    if let Some(element) = inner.next() {
                        return Some(element);
                    }
                    if let Source::Inner(finished) = std::mem::replace(&mut self.source, Source::Done) {
                        self.absorb(*finished);
                    }
                    return None;
                }
                Source::Many { rest, current } => {
                    if let Some(inner) = current.as_mut() {
                        if let Some(element) = inner.next() {
                            return Some(element);
                        }
                        if let Some(finished) = current.take() {
                            if self.absorb(*finished) {
                                return None;
                            }
                        }
                        continue;
                    }
                    match rest.next() {
                        Some(collection) => *current = Some(Box::new(collection.iter_quiet())),
                        None => self.source = Source::Done,
                    }
                }
            }
        }
    }

    fn emit(&self, element: Element) -> Element {
        if self.callbacks {
            self.collection.intf.run_callback(&element);
        }
        element
    }
}

impl Iterator for Elements {
    type Item = Element;

    fn next(&mut self) -> Option<Element> {
        loop {
            if self.check_interrupt() {
                return None;
            }
            if let Some(child) = self.nested.as_mut() {
                if let Some(element) = child.next() {
                    return Some(self.emit(element));
                }
                if let Some(finished) = self.nested.take() {
                    if self.absorb(*finished) {
                        return None;
                    }
                }
                continue;
            }
            let element = self.advance()?;
            match self.collection.nested.clone() {
                None => return Some(self.emit(element)),
                Some(child) => {
                    let expanded = self.collection.expand(&element, &child);
                    self.nested = Some(Box::new(expanded.iter_quiet()));
                }
            }
        }
    }
}
