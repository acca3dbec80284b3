//! Restree – a schema-driven object layer over hierarchical REST resource trees.
//!
//! A remote service such as XNAT exposes its data as a tree of named
//! resources: projects → subjects → experiments → scans / assessors /
//! reconstructions → resources → files. Restree lets a caller walk and
//! mutate that tree through handles and lazy collections instead of
//! hand-built URIs and query strings.
//!
//! ## Object model
//! * An [`element::Element`] is one addressed node: a URI plus the session it
//!   belongs to. Every property is re-queried from the server when asked for.
//! * A [`collection::Collection`] is a lazy, possibly nested, set of elements.
//!   Nothing is fetched until it is iterated, and nested collections
//!   (every scan of every experiment of a subject) are expanded depth first.
//! * Both dispatch their child accessors through the capability tables of
//!   [`registry::TypeRegistry`], which are generated from the node table of
//!   [`schema::Schema`].
//!
//! ## Modules
//! * [`uri`] – URI algebra: join, parent, shape, canonical translation.
//! * [`schema`] – The resource tree table, with the XNAT default.
//! * [`registry`] – Node types and their accessor tables.
//! * [`learned`] – Cache of element subtypes observed per URI shape.
//! * [`transport`] – The remote service seam and its `reqwest` implementation.
//! * [`interface`] – The session every handle shares.
//! * [`constraint`] and [`search`] – Search constraints, their subject-centric
//!   rewrite and the search documents sent to the service.
//! * [`xpath`] – Element documents and the location paths used on them.
//! * [`tags`] – Tagging collaborator.
//! * [`specialized`] – Project administration, sharing, triggers and
//!   parameters.
//!
//! ## Learning subtypes
//! Element subtypes (`xnat:mrSessionData`, `xnat:petSessionData`, ...) are not
//! predictable from the tree alone. Listings of gatherable nodes ask the
//! server for `xsiType` and remember the subtype per URI shape in
//! [`learned::LearnedSchema`], on disk under the configured cache directory.
//! Later listings and creations use what was learned to narrow their
//! queries.
//!
//! ## Quick Start
//! ```no_run
//! use restree::{config::Settings, interface::Interface};
//! let settings = Settings::load(None).unwrap();
//! let intf = Interface::connect(settings).unwrap();
//! for subject in intf.select("/projects/P1/subjects").unwrap().into_collection().unwrap().iter() {
//!     println!("{} {:?}", subject, subject.label());
//! }
//! ```
//!
//! ## Faults
//! Query paths tolerate transport faults: they are logged and the query
//! degrades to an empty result. With [`config::Settings::debug`] set they are
//! surfaced instead. See [`error::RestreeError`].

pub mod error;
pub mod config;
pub mod uri;
pub mod schema;
pub mod registry;
pub mod learned;
pub mod transport;
pub mod interface;
pub mod element;
pub mod collection;
pub mod constraint;
pub mod search;
pub mod xpath;
pub mod tags;
pub mod specialized;

pub use collection::{Collection, Elements, Fetched, Field, FieldValue, IdField};
pub use config::Settings;
pub use constraint::{Criterion, Filter, Junction, Query, Term};
pub use element::{CreateParams, Created, Element};
pub use error::{RestreeError, Result};
pub use interface::{Interface, Interrupt, Selection};
pub use schema::Schema;
pub use transport::{HttpTransport, Method, Row, Transport};
