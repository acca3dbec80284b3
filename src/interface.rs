//! Shared service interface.
//!
//! An [`Interface`] is the context object every element and collection holds
//! on to. It threads the transport, the settings, the schema table, the type
//! registry and the learned-schema cache through the object layer, so that
//! none of them has to live in a process-wide singleton. Cloning an
//! interface is cheap; all clones share one session.
//!
//! Long running iterations can be stopped from another thread through the
//! session's [`Interrupt`] token. The collection that observes it reconnects
//! the transport and ends its sequence normally.

use std::fmt;
use std::sync::{Arc, Mutex, atomic::{AtomicBool, Ordering}};

use tracing::{debug, warn};

use crate::collection::Collection;
use crate::config::Settings;
use crate::element::Element;
use crate::error::{RestreeError, Result};
use crate::learned::LearnedSchema;
use crate::registry::TypeRegistry;
use crate::schema::Schema;
use crate::tags::{LocalTags, TagManager};
use crate::transport::{HttpTransport, Method, Row, Transport};
use crate::uri;

/// Interruption token shared with whoever may want to stop an iteration.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);
impl Interrupt {
    pub fn new() -> Self { Self(Arc::new(AtomicBool::new(false))) }
    pub fn raise(&self) { self.0.store(true, Ordering::SeqCst); }
    pub fn is_raised(&self) -> bool { self.0.load(Ordering::Relaxed) }
    /// Clears the token, returning whether it was raised.
    pub fn take(&self) -> bool { self.0.swap(false, Ordering::SeqCst) }
}

/// Invoked for every element a collection yields.
pub type Callback = Arc<dyn Fn(&Element) + Send + Sync>;

/// Result of [`Interface::select`].
#[derive(Debug, Clone)]
pub enum Selection {
    Element(Element),
    Collection(Collection),
}

impl Selection {
    pub fn into_element(self) -> Option<Element> {
        match self {
            Selection::Element(e) => Some(e),
            Selection::Collection(_) => None,
        }
    }
    pub fn into_collection(self) -> Option<Collection> {
        match self {
            Selection::Collection(c) => Some(c),
            Selection::Element(_) => None,
        }
    }
}

struct Session {
    transport: Arc<dyn Transport>,
    settings: Settings,
    schema: Schema,
    registry: TypeRegistry,
    learned: LearnedSchema,
    interrupt: Interrupt,
    tags: Arc<dyn TagManager>,
    callback: Mutex<Option<Callback>>,
}

#[derive(Clone)]
pub struct Interface {
    session: Arc<Session>,
}

impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("server", &self.session.settings.server)
            .field("entry_point", &self.session.settings.entry_point)
            .finish()
    }
}

impl Interface {
    /// Session over the XNAT schema with process-local tags.
    pub fn new(transport: Arc<dyn Transport>, settings: Settings) -> Result<Self> {
        Self::with_parts(transport, settings, Schema::xnat(), Arc::new(LocalTags::new()))
    }

    pub fn with_parts(
        transport: Arc<dyn Transport>,
        settings: Settings,
        schema: Schema,
        tags: Arc<dyn TagManager>,
    ) -> Result<Self> {
        let learned = LearnedSchema::load(&settings.cache_dir)?;
        let registry = TypeRegistry::new(&schema);
        Ok(Self {
            session: Arc::new(Session {
                transport,
                settings,
                schema,
                registry,
                learned,
                interrupt: Interrupt::new(),
                tags,
                callback: Mutex::new(None),
            }),
        })
    }

    /// Session talking HTTP to `settings.server`.
    pub fn connect(settings: Settings) -> Result<Self> {
        let transport = HttpTransport::new(&settings)?;
        Self::new(Arc::new(transport), settings)
    }

    pub fn settings(&self) -> &Settings {
        &self.session.settings
    }
    pub fn entry_point(&self) -> &str {
        &self.session.settings.entry_point
    }
    pub fn schema(&self) -> &Schema {
        &self.session.schema
    }
    pub fn registry(&self) -> &TypeRegistry {
        &self.session.registry
    }
    pub fn learned(&self) -> &LearnedSchema {
        &self.session.learned
    }
    pub fn tags(&self) -> &dyn TagManager {
        self.session.tags.as_ref()
    }
    pub fn interrupt(&self) -> Interrupt {
        self.session.interrupt.clone()
    }
    pub fn is_debug(&self) -> bool {
        self.session.settings.debug
    }

    // ------------- Remote calls -------------
    pub fn execute(
        &self,
        uri: &str,
        method: Method,
        body: Option<&[u8]>,
        headers: &[(String, String)],
    ) -> Result<String> {
        debug!("{} {}", method, uri);
        self.session.transport.execute(uri, method, body, headers)
    }

    pub fn get_json(&self, uri: &str) -> Result<Vec<Row>> {
        debug!("GET {} (table)", uri);
        self.session.transport.get_json_table(uri)
    }

    pub fn get_head(&self, uri: &str) -> Result<Vec<(String, String)>> {
        debug!("HEAD {}", uri);
        self.session.transport.get_head(uri)
    }

    pub fn reconnect(&self) -> Result<()> {
        debug!("reconnecting to {}", self.session.settings.server);
        self.session.transport.reconnect()
    }

    /// Applies the fault policy of query paths: outside debug mode a failed
    /// call is logged and replaced by `fallback`.
    pub fn tolerate<T>(&self, result: Result<T>, fallback: T, context: &str) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) if self.is_debug() => Err(e),
            Err(e) => {
                warn!("{}: {}", context, e);
                Ok(fallback)
            }
        }
    }

    // ------------- Callback -------------
    pub fn set_callback(&self, callback: impl Fn(&Element) + Send + Sync + 'static) {
        if let Ok(mut slot) = self.session.callback.lock() {
            *slot = Some(Arc::new(callback));
        }
    }
    pub fn clear_callback(&self) {
        if let Ok(mut slot) = self.session.callback.lock() {
            *slot = None;
        }
    }
    pub(crate) fn run_callback(&self, element: &Element) {
        let callback = match self.session.callback.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        if let Some(callback) = callback {
            callback(element);
        }
    }

    // ------------- Navigation -------------
    /// Root collection of a node name, e.g. every project.
    pub fn collection(&self, node: &str) -> Result<Collection> {
        let node_type = self.registry().lookup(node)?;
        Ok(Collection::from_template(
            &uri::join(self.entry_point(), &[&node_type.name]),
            self,
        ))
    }

    pub fn element(&self, uri: &str) -> Element {
        Element::new(uri, self)
    }

    /// Resolves a path such as `/project/P1/subject/S1` or
    /// `/projects/P*/subjects`. Node names may be singular or plural and
    /// identifiers may be glob patterns. A path ending on an identifier
    /// selects an element, unless an identifier along the way was a pattern.
    pub fn select(&self, path: &str) -> Result<Selection> {
        let relative = uri::relative(path, self.entry_point());
        let raw: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
        if raw.is_empty() {
            return Err(RestreeError::Addressing(format!("nothing to select in '{path}'")));
        }

        let mut tokens: Vec<String> = Vec::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            // in/resources and out/files are spelled as one node name
            if tokens.len() % 2 == 0
                && (raw[i] == "in" || raw[i] == "out")
                && i + 1 < raw.len()
                && self.schema().is_node(&format!("{}_{}", raw[i], raw[i + 1]))
            {
                tokens.push(format!("{}_{}", raw[i], raw[i + 1]));
                i += 2;
                continue;
            }
            tokens.push(raw[i].to_string());
            i += 1;
        }

        let mut current: Option<Selection> = None;
        for step in tokens.chunks(2) {
            let node = self.registry().lookup(&step[0])?;
            let plural = node.name.as_str();
            let id = step.get(1).map(|s| s.as_str());
            let is_pattern = id.map(is_glob).unwrap_or(false);
            current = Some(match (current, id) {
                (None, None) => Selection::Collection(self.collection(plural)?),
                (None, Some(id)) if is_pattern => {
                    Selection::Collection(self.collection(plural)?.with_pattern(id))
                }
                (None, Some(id)) => Selection::Element(Element::new(
                    &uri::join(self.entry_point(), &[plural, id]),
                    self,
                )),
                (Some(Selection::Element(e)), None) => Selection::Collection(e.collection(plural)?),
                (Some(Selection::Element(e)), Some(id)) if is_pattern => {
                    Selection::Collection(e.collection_matching(plural, id)?)
                }
                (Some(Selection::Element(e)), Some(id)) => {
                    Selection::Element(e.element(&node.singular, id)?)
                }
                (Some(Selection::Collection(c)), None) => Selection::Collection(c.collection(plural)?),
                (Some(Selection::Collection(c)), Some(id)) => {
                    Selection::Collection(c.collection_matching(plural, id)?)
                }
            });
        }
        current.ok_or_else(|| RestreeError::Addressing(format!("nothing to select in '{path}'")))
    }
}

fn is_glob(id: &str) -> bool {
    id.contains(['*', '?', '['])
}
