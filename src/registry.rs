//! Type registry.
//!
//! Every node name of the schema gets one [`NodeType`], built once when the
//! session starts. A node type carries two capability tables, one consulted
//! when an accessor is invoked on a single element of the node and one when
//! it is invoked on a collection of them. Each child `C` of the node
//! contributes two entries per table: the plural name yields collections and
//! the singular name addresses one identifier.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::collection::Collection;
use crate::element::Element;
use crate::error::{RestreeError, Result};
use crate::schema::{OtherHasher, Schema};
use crate::uri;

// ------------- Factories -------------
/// Child collection of a single element; the last argument is a glob pattern.
pub type ElementToCollection = fn(&Element, &str, &str) -> Collection;
/// One child of a single element; the last argument is its identifier.
pub type ElementToElement = fn(&Element, &str, &str) -> Element;
/// Nested collection over a collection; the last argument is a glob pattern.
pub type CollectionToCollection = fn(&Collection, &str, &str) -> Collection;

#[derive(Clone, Copy)]
pub enum ElementAccessor {
    Many(ElementToCollection),
    One(ElementToElement),
}

#[derive(Clone, Copy)]
pub enum CollectionAccessor {
    Many(CollectionToCollection),
    /// Same signature as `Many`, but the argument is an identifier looked up
    /// under every member of the collection.
    One(CollectionToCollection),
}

fn collection_from_element(element: &Element, child: &str, pattern: &str) -> Collection {
    Collection::from_template(&uri::join(element.uri(), &[child]), element.interface())
        .with_pattern(pattern)
}

fn element_from_element(element: &Element, child: &str, id: &str) -> Element {
    Element::new(&uri::join(element.uri(), &[child, id]), element.interface())
}

fn collection_from_collection(parent: &Collection, child: &str, pattern: &str) -> Collection {
    Collection::from_collection(parent.clone())
        .with_pattern(pattern)
        .with_id_field(parent.id_field().clone())
        .with_columns(parent.columns())
        .with_nested(child)
}

fn elements_from_collection(parent: &Collection, child: &str, id: &str) -> Collection {
    let members: Vec<Element> = parent
        .iter()
        .map(|element| element_from_element(&element, child, id))
        .collect();
    Collection::from_elements(members, parent.interface()).with_node(child)
}

// ------------- Node types -------------
pub struct NodeType {
    pub name: String,
    pub singular: String,
    generic: bool,
    element_accessors: HashMap<String, ElementAccessor, OtherHasher>,
    collection_accessors: HashMap<String, CollectionAccessor, OtherHasher>,
}

impl NodeType {
    fn declare(schema: &Schema, name: &str) -> Self {
        let mut element_accessors = HashMap::<String, ElementAccessor, OtherHasher>::default();
        let mut collection_accessors =
            HashMap::<String, CollectionAccessor, OtherHasher>::default();
        for child in schema.children(name) {
            let singular = schema.singular(child).unwrap_or(child.as_str()).to_string();
            element_accessors.insert(child.clone(), ElementAccessor::Many(collection_from_element));
            element_accessors.insert(singular.clone(), ElementAccessor::One(element_from_element));
            collection_accessors.insert(
                child.clone(),
                CollectionAccessor::Many(collection_from_collection),
            );
            collection_accessors.insert(singular, CollectionAccessor::One(elements_from_collection));
        }
        Self {
            name: name.to_string(),
            singular: schema.singular(name).unwrap_or(name).to_string(),
            generic: false,
            element_accessors,
            collection_accessors,
        }
    }

    fn generic() -> Self {
        Self {
            name: String::new(),
            singular: String::new(),
            generic: true,
            element_accessors: HashMap::default(),
            collection_accessors: HashMap::default(),
        }
    }

    /// True for the fallback type of opaque node names.
    pub fn is_generic(&self) -> bool {
        self.generic
    }

    /// Accessor names available on a single element, plural ones first.
    pub fn accessors(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.element_accessors.keys().map(|k| k.as_str()).collect();
        names.sort_by_key(|name| {
            (
                matches!(self.element_accessors.get(*name), Some(ElementAccessor::One(_))),
                *name,
            )
        });
        names
    }

    pub fn element_accessor(&self, accessor: &str) -> Result<ElementAccessor> {
        self.element_accessors.get(accessor).copied().ok_or_else(|| {
            RestreeError::Programming(format!(
                "'{}' elements have no accessor '{accessor}'",
                self.display_name()
            ))
        })
    }

    pub fn collection_accessor(&self, accessor: &str) -> Result<CollectionAccessor> {
        self.collection_accessors.get(accessor).copied().ok_or_else(|| {
            RestreeError::Programming(format!(
                "'{}' collections have no accessor '{accessor}'",
                self.display_name()
            ))
        })
    }

    fn display_name(&self) -> &str {
        if self.generic { "generic" } else { &self.name }
    }
}

impl std::fmt::Debug for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeType")
            .field("name", &self.name)
            .field("generic", &self.generic)
            .field("accessors", &self.accessors())
            .finish()
    }
}

// ------------- Registry -------------
#[derive(Debug)]
pub struct TypeRegistry {
    types: HashMap<String, Arc<NodeType>, OtherHasher>,
    generic: Arc<NodeType>,
}

impl TypeRegistry {
    /// Single registration pass over the schema.
    pub fn new(schema: &Schema) -> Self {
        let mut types = HashMap::<String, Arc<NodeType>, OtherHasher>::default();
        for name in schema.node_names() {
            let node = Arc::new(NodeType::declare(schema, name));
            trace!("registered node type {} ({})", node.name, node.singular);
            types.insert(node.singular.clone(), Arc::clone(&node));
            types.insert(node.name.clone(), node);
        }
        Self {
            types,
            generic: Arc::new(NodeType::generic()),
        }
    }

    /// Strict lookup by plural or singular name.
    pub fn lookup(&self, name: &str) -> Result<Arc<NodeType>> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| RestreeError::Programming(format!("unknown node name '{name}'")))
    }

    /// Lookup that falls back to the generic type for opaque node names.
    pub fn lookup_or_generic(&self, name: &str) -> Arc<NodeType> {
        self.types
            .get(name)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.generic))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }
}
