//! Resource handle: one addressed node of the tree.
//!
//! An [`Element`] is a URI plus the session it belongs to. Constructing one
//! never talks to the server; every property (identifier, label, subtype,
//! existence) is re-queried when asked for, so a handle always reflects the
//! server's current state.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::collection::Collection;
use crate::error::{RestreeError, Result};
use crate::interface::{Interface, Selection};
use crate::registry::{ElementAccessor, NodeType};
use crate::schema::DatatypePolicy;
use crate::transport::{self, Method, Row};
use crate::uri;
use crate::xpath;

/// Parameters of [`Element::create`].
///
/// `fields` keys are either node names (`experiments`) giving the subtype to
/// create at that level, subtype-qualified paths (`xnat:subjectData/ID`) or
/// plain shortcuts (`ID`, `label`).
#[derive(Debug, Clone, Default)]
pub struct CreateParams {
    pub fields: BTreeMap<String, String>,
    pub use_label: bool,
    pub xml: Option<PathBuf>,
}

impl CreateParams {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.fields.insert(key.to_string(), value.to_string());
        self
    }
    pub fn use_label(mut self, use_label: bool) -> Self {
        self.use_label = use_label;
        self
    }
    pub fn xml(mut self, path: impl Into<PathBuf>) -> Self {
        self.xml = Some(path.into());
        self
    }
}

/// Outcome of a creation.
#[derive(Debug, Clone)]
pub enum Created {
    Element(Element),
    /// Schema paths (`<datatype>/<element>`) the server still requires.
    Required(Vec<String>),
}

impl Created {
    pub fn is_element(&self) -> bool {
        matches!(self, Created::Element(_))
    }
}

#[derive(Clone)]
pub struct Element {
    uri: String,
    urn: String,
    urt: String,
    node: Arc<NodeType>,
    intf: Interface,
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {}>", self.display_type(), self.urn)
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.urn)
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri
    }
}
impl Eq for Element {}

impl Element {
    /// Handle for `uri`, translated to the canonical rooted form and
    /// percent-encoded. Opaque node names get the generic type.
    pub fn new(uri: &str, intf: &Interface) -> Self {
        let uri = uri::encode(&uri::translate(uri, intf.entry_point()));
        let urn = uri::last(&uri).map(uri::decode).unwrap_or_default();
        let urt = uri::next_to_last(&uri).unwrap_or_default();
        let node = intf.registry().lookup_or_generic(&urt);
        Self {
            uri,
            urn,
            urt,
            node,
            intf: intf.clone(),
        }
    }

    /// Like [`Element::new`] but the node name must be a known one.
    pub fn typed(uri: &str, intf: &Interface) -> Result<Self> {
        let translated = uri::translate(uri, intf.entry_point());
        let urt = uri::next_to_last(&translated)?;
        intf.registry().lookup(&urt)?;
        Ok(Self::new(&translated, intf))
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
    /// The decoded trailing identifier.
    pub fn name(&self) -> &str {
        &self.urn
    }
    pub fn node_name(&self) -> &str {
        &self.urt
    }
    pub fn node(&self) -> &NodeType {
        &self.node
    }
    pub fn interface(&self) -> &Interface {
        &self.intf
    }
    pub fn relative_uri(&self) -> &str {
        uri::relative(&self.uri, self.intf.entry_point())
    }

    fn display_type(&self) -> &str {
        if self.node.is_generic() { "Element" } else { &self.node.singular }
    }

    pub(crate) fn expect_node(&self, nodes: &[&str], operation: &str) -> Result<()> {
        if nodes.contains(&self.urt.as_str()) {
            Ok(())
        } else {
            Err(RestreeError::Programming(format!(
                "{operation} is not available on {} elements",
                self.urt
            )))
        }
    }

    // ------------- Properties -------------
    /// The listing row of this element, fetched from the parent collection
    /// with the requested columns plus the id and label columns. Learned
    /// subtypes matching this URI narrow the listing.
    pub fn cells(&self, columns: &[&str]) -> Result<Option<Row>> {
        let listing = uri::parent(&self.uri)?;
        let (id_field, label_field) = self.intf.schema().fields(&self.urt);
        let mut requested: Vec<&str> = Vec::with_capacity(columns.len() + 2);
        for column in columns.iter().copied().chain([id_field, label_field]) {
            if !requested.contains(&column) {
                requested.push(column);
            }
        }
        let mut query = format!("{}?format=json&columns={}", listing, requested.join(","));
        let subtypes = self.intf.learned().matching(self.relative_uri());
        if !subtypes.is_empty() {
            query.push_str("&xsiType=");
            query.push_str(&subtypes.join(","));
        }
        let rows = self.intf.get_json(&query)?;
        Ok(rows.into_iter().find(|row| {
            row.get(id_field).map(String::as_str) == Some(self.urn.as_str())
                || row.get(label_field).map(String::as_str) == Some(self.urn.as_str())
        }))
    }

    fn cell(&self, column: &str) -> Result<Option<String>> {
        let row = self.cells(&[column])?;
        Ok(row.and_then(|mut row| row.remove(column)))
    }

    fn tolerant_cell(&self, column: &str) -> Result<Option<String>> {
        let context = format!("reading {} of {}", column, self.uri);
        self.intf.tolerate(self.cell(column), None, &context)
    }

    /// Identifier as reported by the server, `None` if no listing row matches.
    pub fn identifier(&self) -> Result<Option<String>> {
        let id_field = self.intf.schema().id_field(&self.urt).to_string();
        self.tolerant_cell(&id_field)
    }

    pub fn label(&self) -> Result<Option<String>> {
        let label_field = self.intf.schema().label_field(&self.urt).to_string();
        self.tolerant_cell(&label_field)
    }

    /// Most specific subtype.
    pub fn datatype(&self) -> Result<Option<String>> {
        let schema = self.intf.schema();
        let default = schema.default_datatype(&self.urt).map(str::to_string);
        match schema.policy(&self.urt) {
            DatatypePolicy::Fixed => Ok(default),
            DatatypePolicy::Observed => self.tolerant_cell("xsiType"),
            DatatypePolicy::ObservedOrDefault => {
                Ok(self.tolerant_cell("xsiType")?.filter(|t| !t.is_empty()).or(default))
            }
        }
    }

    /// Faults count as non-existence, even in debug mode.
    pub fn exists(&self) -> bool {
        let id_field = self.intf.schema().id_field(&self.urt).to_string();
        match self.cell(&id_field) {
            Ok(id) => id.is_some(),
            Err(e) => {
                warn!("existence check of {} failed: {}", self.uri, e);
                false
            }
        }
    }

    // ------------- Mutation -------------
    /// Creates this element, and any missing ancestor, unless it exists.
    ///
    /// Returns [`Created::Required`] instead of the element when the server
    /// rejects the creation for lack of required fields.
    pub fn create(&self, params: &CreateParams) -> Result<Created> {
        if let Some(xml) = params.xml.as_ref().filter(|path| path.exists()) {
            let document = fs::read_to_string(xml)?;
            return self.upload_document(&document);
        }
        let mut remaining = params.fields.clone();
        self.create_with(&mut remaining, params.use_label)
    }

    /// Same as [`Element::create`].
    pub fn insert(&self, params: &CreateParams) -> Result<Created> {
        self.create(params)
    }

    fn upload_document(&self, document: &str) -> Result<Created> {
        let document = match xpath::relabel_root(document, &self.urn) {
            Ok(relabelled) => relabelled,
            Err(e) => {
                debug!("uploading {} without relabelling: {}", self.uri, e);
                document.to_string()
            }
        };
        let headers = [("Content-Type".to_string(), "text/xml".to_string())];
        info!("uploading document to {}", self.uri);
        let output = self.intf.execute(
            &format!("{}?allowDataDeletion=true", self.uri),
            Method::Put,
            Some(document.as_bytes()),
            &headers,
        )?;
        if transport::is_error_page(&output) {
            return Err(RestreeError::Data(transport::error_description(&output)));
        }
        Ok(Created::Element(self.clone()))
    }

    fn subtype_for_creation(&self, params: &BTreeMap<String, String>) -> Option<String> {
        params
            .get(&self.urt)
            .cloned()
            .or_else(|| self.intf.learned().first_match(self.relative_uri()))
            .or_else(|| {
                self.intf
                    .schema()
                    .default_datatype(&self.urt)
                    .map(str::to_string)
            })
    }

    fn create_with(&self, params: &mut BTreeMap<String, String>, use_label: bool) -> Result<Created> {
        let mut create_uri = self.uri.clone();
        if let Some(datatype) = self.subtype_for_creation(params) {
            let schema = self.intf.schema();
            let local: Vec<String> = params
                .keys()
                .filter(|key| {
                    !schema.is_node(key) && (key.starts_with(&datatype) || !key.contains('/'))
                })
                .cloned()
                .collect();

            let mut query = vec![format!("xsiType={datatype}")];
            let qualified_id = format!("{datatype}/ID");
            if use_label && !local.iter().any(|k| *k == "ID" || *k == qualified_id) {
                query.push(format!("{qualified_id}={}", urlencoding::encode(&self.urn)));
            }
            for key in &local {
                // local parameters are spent here, not on an ancestor
                if let Some(value) = params.remove(key) {
                    query.push(format!("{key}={}", urlencoding::encode(&value)));
                }
            }
            create_uri = format!("{}?{}", self.uri, query.join("&"));
        }

        if self.urt != "projects" {
            let parent = self.parent()?;
            if !parent.exists() {
                debug!("creating missing ancestor {}", parent.uri);
                if let Created::Required(paths) = parent.create_with(params, use_label)? {
                    return Ok(Created::Required(paths));
                }
            }
        }

        info!("creating {}", self.uri);
        let output = self.intf.execute(&create_uri, Method::Put, None, &[])?;
        if transport::is_error_page(&output) {
            let required: Vec<String> = transport::parse_put_error(&output)
                .into_iter()
                .map(|(datatype, element)| format!("{datatype}/{element}"))
                .collect();
            if required.is_empty() {
                return Err(RestreeError::Data(transport::error_description(&output)));
            }
            debug!("{} requires {:?}", self.uri, required);
            return Ok(Created::Required(required));
        }
        Ok(Created::Element(self.clone()))
    }

    /// Removes the element, with its files unless `delete_files` is false.
    pub fn delete(&self, delete_files: bool) -> Result<()> {
        let delete_uri = if delete_files {
            format!("{}?removeFiles=true", self.uri)
        } else {
            self.uri.clone()
        };
        info!("deleting {}", self.uri);
        let output = self.intf.execute(&delete_uri, Method::Delete, None, &[])?;
        if transport::is_error_page(&output) {
            return Err(RestreeError::Data(transport::error_description(&output)));
        }
        Ok(())
    }

    // ------------- Documents -------------
    /// The element's XML document.
    pub fn get(&self) -> Result<String> {
        let document = self
            .intf
            .execute(&format!("{}?format=xml", self.uri), Method::Get, None, &[])?;
        if transport::is_error_page(&document) {
            return Err(RestreeError::Data(transport::error_description(&document)));
        }
        Ok(document)
    }

    /// Evaluates `expression` against [`Element::get`], with the namespaces
    /// the document declares at its root.
    pub fn xpath(&self, expression: &str) -> Result<Vec<String>> {
        let document = xpath::Document::parse(&self.get()?)?;
        document.evaluate(expression)
    }

    // ------------- Navigation -------------
    /// The owning element.
    pub fn parent(&self) -> Result<Element> {
        Element::typed(&uri::grandparent(&self.uri)?, &self.intf)
    }

    /// Child node names of this element.
    pub fn children(&self) -> Vec<String> {
        self.intf.schema().children(&self.urt).to_vec()
    }

    /// Every child of every child node, as one collection.
    pub fn children_collection(&self) -> Result<Collection> {
        let collections = self
            .children()
            .iter()
            .map(|child| self.collection(child))
            .collect::<Result<Vec<_>>>()?;
        Ok(Collection::from_collections(collections, &self.intf))
    }

    /// Invokes the accessor `accessor` of this element's node type. Plural
    /// accessors take a pattern and yield a collection; singular ones take
    /// an identifier and yield an element.
    pub fn child(&self, accessor: &str, argument: &str) -> Result<Selection> {
        let child = self
            .intf
            .schema()
            .plural(accessor)
            .unwrap_or(accessor)
            .to_string();
        Ok(match self.node.element_accessor(accessor)? {
            ElementAccessor::Many(factory) => Selection::Collection(factory(self, &child, argument)),
            ElementAccessor::One(factory) => Selection::Element(factory(self, &child, argument)),
        })
    }

    pub fn collection(&self, child: &str) -> Result<Collection> {
        self.collection_matching(child, uri::WILDCARD)
    }

    pub fn collection_matching(&self, child: &str, pattern: &str) -> Result<Collection> {
        let plural = self.intf.schema().plural(child).unwrap_or(child).to_string();
        self.child(&plural, pattern)?.into_collection().ok_or_else(|| {
            RestreeError::Programming(format!("'{child}' does not yield a collection"))
        })
    }

    pub fn element(&self, child: &str, id: &str) -> Result<Element> {
        let singular = self.intf.schema().singular(child).unwrap_or(child).to_string();
        self.child(&singular, id)?.into_element().ok_or_else(|| {
            RestreeError::Programming(format!("'{child}' does not yield an element"))
        })
    }

    // ------------- Tags -------------
    pub fn tag(&self, name: &str) -> Result<()> {
        let tags = self.intf.tags();
        if !tags.exists(name)? {
            tags.create(name)?;
        }
        tags.reference_many(name, &[self.uri.clone()])
    }

    /// Removes the tag from this element, and the tag itself once it
    /// references nothing.
    pub fn untag(&self, name: &str) -> Result<()> {
        let tags = self.intf.tags();
        tags.dereference_many(name, &[self.uri.clone()])?;
        if tags.references(name)?.is_empty() {
            tags.delete(name)?;
        }
        Ok(())
    }
}
