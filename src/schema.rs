//! The resource-tree table.
//!
//! A static description of which node names exist, which children each of
//! them has, the columns carrying their identifier and label in a tabular
//! listing, and the subtype a freshly created element defaults to.

// used to keep the one-to-one mapping between singular and plural node names
use bimap::BiMap;

// node lookups use a fast non-cryptographic hasher
use core::hash::BuildHasherDefault;
use seahash::SeaHasher;
use std::collections::HashMap;

pub type OtherHasher = BuildHasherDefault<SeaHasher>;

/// Node names whose subtypes are worth learning automatically.
pub const GATHERABLE: [&str; 4] = ["experiments", "assessors", "scans", "reconstructions"];

/// How `Element::datatype` arrives at its answer for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatatypePolicy {
    /// Always the schema default, no round trip.
    Fixed,
    /// The observed `xsiType` cell.
    Observed,
    /// The observed cell, or the default when nothing was observed.
    ObservedOrDefault,
}

#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub children: Vec<String>,
    pub id_field: String,
    pub label_field: String,
    pub default_datatype: Option<String>,
    pub policy: DatatypePolicy,
}

impl NodeSpec {
    pub fn new(id_field: &str, label_field: &str) -> Self {
        Self {
            children: Vec::new(),
            id_field: id_field.to_string(),
            label_field: label_field.to_string(),
            default_datatype: None,
            policy: DatatypePolicy::Observed,
        }
    }
    pub fn with_children(mut self, children: &[&str]) -> Self {
        self.children = children.iter().map(|c| c.to_string()).collect();
        self
    }
    pub fn with_default(mut self, datatype: &str) -> Self {
        self.default_datatype = Some(datatype.to_string());
        self
    }
    pub fn with_policy(mut self, policy: DatatypePolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    nodes: HashMap<String, NodeSpec, OtherHasher>,
    order: Vec<String>,
    // singular <-> plural
    names: BiMap<String, String>,
}

fn singular_of(plural: &str) -> String {
    plural.strip_suffix('s').unwrap_or(plural).to_string()
}

impl Schema {
    pub fn empty() -> Self {
        Self {
            nodes: HashMap::default(),
            order: Vec::new(),
            names: BiMap::new(),
        }
    }

    /// Declares (or redeclares) a node under its plural name.
    pub fn with_node(mut self, plural: &str, spec: NodeSpec) -> Self {
        if self.nodes.insert(plural.to_string(), spec).is_none() {
            self.order.push(plural.to_string());
        }
        self.names.insert(singular_of(plural), plural.to_string());
        self
    }

    /// The XNAT resource tree.
    pub fn xnat() -> Self {
        let resources = |id: &str| {
            NodeSpec::new("xnat_abstractresource_id", "label")
                .with_children(&["files"])
                .with_default(id)
        };
        Schema::empty()
            .with_node(
                "projects",
                NodeSpec::new("ID", "secondary_ID")
                    .with_children(&["subjects", "resources"])
                    .with_default("xnat:projectData")
                    .with_policy(DatatypePolicy::Fixed),
            )
            .with_node(
                "subjects",
                NodeSpec::new("ID", "label")
                    .with_children(&["experiments", "resources"])
                    .with_default("xnat:subjectData")
                    .with_policy(DatatypePolicy::Fixed),
            )
            .with_node(
                "experiments",
                NodeSpec::new("ID", "label")
                    .with_children(&["assessors", "reconstructions", "scans", "resources"])
                    .with_default("xnat:mrSessionData"),
            )
            .with_node(
                "assessors",
                NodeSpec::new("ID", "label")
                    .with_children(&["resources", "in_resources", "out_resources"])
                    .with_default("xnat:imageAssessorData"),
            )
            .with_node(
                "reconstructions",
                NodeSpec::new("ID", "ID")
                    .with_children(&["in_resources", "out_resources"])
                    .with_default("xnat:reconstructedImageData")
                    .with_policy(DatatypePolicy::ObservedOrDefault),
            )
            .with_node(
                "scans",
                NodeSpec::new("ID", "ID")
                    .with_children(&["resources"])
                    .with_default("xnat:mrScanData"),
            )
            .with_node("resources", resources("xnat:resourceCatalog"))
            .with_node("in_resources", resources("xnat:resourceCatalog"))
            .with_node("out_resources", resources("xnat:resourceCatalog"))
            .with_node("files", NodeSpec::new("Name", "Name"))
    }

    /// Canonical (plural) form of a node name given in either form.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        if let Some((plural, _)) = self.nodes.get_key_value(name) {
            return Some(plural.as_str());
        }
        self.names
            .get_by_left(name)
            .filter(|plural| self.nodes.contains_key(plural.as_str()))
            .map(|plural| plural.as_str())
    }
    pub fn is_node(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }
    pub fn is_singular(&self, name: &str) -> bool {
        self.names.contains_left(name) && !self.nodes.contains_key(name)
    }
    pub fn plural(&self, name: &str) -> Option<&str> {
        self.resolve(name)
    }
    pub fn singular(&self, name: &str) -> Option<&str> {
        let plural = self.resolve(name)?;
        self.names.get_by_right(plural).map(|s| s.as_str())
    }
    pub fn spec(&self, name: &str) -> Option<&NodeSpec> {
        self.resolve(name).and_then(|plural| self.nodes.get(plural))
    }
    pub fn children(&self, name: &str) -> &[String] {
        self.spec(name).map(|s| s.children.as_slice()).unwrap_or(&[])
    }
    pub fn has_child(&self, name: &str, child: &str) -> bool {
        match self.resolve(child) {
            Some(child) => self.children(name).iter().any(|c| c == child),
            None => false,
        }
    }
    /// `(id_field, label_field)`, defaulting to `ID` for unknown nodes.
    pub fn fields(&self, name: &str) -> (&str, &str) {
        match self.spec(name) {
            Some(spec) => (spec.id_field.as_str(), spec.label_field.as_str()),
            None => ("ID", "ID"),
        }
    }
    pub fn id_field(&self, name: &str) -> &str {
        self.fields(name).0
    }
    pub fn label_field(&self, name: &str) -> &str {
        self.fields(name).1
    }
    pub fn default_datatype(&self, name: &str) -> Option<&str> {
        self.spec(name).and_then(|s| s.default_datatype.as_deref())
    }
    pub fn policy(&self, name: &str) -> DatatypePolicy {
        self.spec(name).map(|s| s.policy).unwrap_or(DatatypePolicy::Observed)
    }
    pub fn is_gatherable(&self, name: &str) -> bool {
        self.resolve(name)
            .map(|plural| GATHERABLE.contains(&plural))
            .unwrap_or(false)
    }
    /// Plural node names in declaration order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|n| n.as_str())
    }
}

impl Default for Schema {
    fn default() -> Self {
        Schema::xnat()
    }
}
