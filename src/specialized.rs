//! Operations only some node types have: project administration, sharing
//! across projects, experiment triggers and scan / assessor parameters.
//!
//! They live on [`Element`] and [`Collection`] and fail with
//! `ProgrammingError` when invoked on the wrong node type.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use tracing::info;

use crate::collection::{Collection, Fetched};
use crate::element::Element;
use crate::error::{RestreeError, Result};
use crate::interface::Interface;
use crate::transport::{self, Method};
use crate::uri;
use crate::xpath;

const SHAREABLE: [&str; 3] = ["subjects", "experiments", "assessors"];
const PARAMETERIZED: [&str; 2] = ["scans", "assessors"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accessibility {
    /// Visible to anyone, readable by anyone.
    Public,
    /// Visible to anyone, readable by project users.
    Protected,
    /// Visible to project users only.
    Private,
}

impl Accessibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Accessibility::Public => "public",
            Accessibility::Protected => "protected",
            Accessibility::Private => "private",
        }
    }
}

impl fmt::Display for Accessibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Accessibility {
    type Err = RestreeError;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "public" => Ok(Accessibility::Public),
            "protected" => Ok(Accessibility::Protected),
            "private" => Ok(Accessibility::Private),
            other => Err(RestreeError::Data(format!("unknown accessibility '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    Member,
    Collaborator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Member => "member",
            Role::Collaborator => "collaborator",
        }
    }

    /// The user group name, e.g. `Owners`.
    pub fn group(&self) -> &'static str {
        match self {
            Role::Owner => "Owners",
            Role::Member => "Members",
            Role::Collaborator => "Collaborators",
        }
    }
}

impl FromStr for Role {
    type Err = RestreeError;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().trim_end_matches('s') {
            "owner" => Ok(Role::Owner),
            "member" => Ok(Role::Member),
            "collaborator" => Ok(Role::Collaborator),
            other => Err(RestreeError::Data(format!("unknown role '{other}'"))),
        }
    }
}

/// Post-archive processing requested by [`Element::trigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triggers {
    pub pipelines: bool,
    pub fix_types: bool,
    pub scan_headers: bool,
}

impl Default for Triggers {
    fn default() -> Self {
        Self {
            pipelines: true,
            fix_types: true,
            scan_headers: true,
        }
    }
}

impl Triggers {
    fn options(&self) -> Vec<&'static str> {
        let mut options = Vec::new();
        if self.pipelines {
            options.push("triggerPipelines=true");
        }
        if self.fix_types {
            options.push("fixScanTypes=true");
        }
        if self.scan_headers {
            options.push("pullDataFromHeaders=true");
        }
        options
    }
}

fn send(intf: &Interface, uri: &str, method: Method) -> Result<String> {
    let output = intf.execute(uri, method, None, &[])?;
    if transport::is_error_page(&output) {
        return Err(RestreeError::Data(transport::error_description(&output)));
    }
    Ok(output)
}

// ------------- Projects -------------
impl Element {
    fn project_text(&self, property: &str) -> Result<String> {
        self.expect_node(&["projects"], property)?;
        let output = send(self.interface(), &uri::join(self.uri(), &[property]), Method::Get)?;
        Ok(output.trim().to_string())
    }

    fn project_code(&self, property: &str) -> Result<u8> {
        let text = self.project_text(property)?;
        text.parse()
            .map_err(|_| RestreeError::parse(format!("{property} '{text}' is not a code")))
    }

    fn project_put(&self, segments: &[&str]) -> Result<()> {
        self.expect_node(&["projects"], segments.first().copied().unwrap_or("update"))?;
        info!("updating {} of {}", segments.join("/"), self.uri());
        send(self.interface(), &uri::join(self.uri(), segments), Method::Put).map(|_| ())
    }

    /// Prearchive code, 0 to 4.
    pub fn prearchive_code(&self) -> Result<u8> {
        self.project_code("prearchive_code")
    }

    pub fn set_prearchive_code(&self, code: u8) -> Result<()> {
        self.project_put(&["prearchive_code", &code.to_string()])
    }

    /// Quarantine code, 0 or 1.
    pub fn quarantine_code(&self) -> Result<u8> {
        self.project_code("quarantine_code")
    }

    pub fn set_quarantine_code(&self, code: u8) -> Result<()> {
        self.project_put(&["quarantine_code", &code.to_string()])
    }

    /// Current archive folder on the server.
    pub fn current_arc(&self) -> Result<String> {
        self.project_text("current_arc")
    }

    pub fn set_subfolder_in_current_arc(&self, subfolder: &str) -> Result<()> {
        let current = self.current_arc()?;
        self.project_put(&["current_arc", &current, subfolder])
    }

    pub fn accessibility(&self) -> Result<Accessibility> {
        self.project_text("accessibility")?.parse()
    }

    pub fn set_accessibility(&self, accessibility: Accessibility) -> Result<()> {
        self.project_put(&["accessibility", accessibility.as_str()])
    }

    fn logins(&self, group: Option<&str>) -> Result<Vec<String>> {
        self.expect_node(&["projects"], "users")?;
        let rows = self
            .interface()
            .get_json(&format!("{}?format=json", uri::join(self.uri(), &["users"])))?;
        Ok(rows
            .into_iter()
            .filter(|row| group.map_or(true, |g| row.get("displayname").map(String::as_str) == Some(g)))
            .filter_map(|mut row| row.remove("login"))
            .collect())
    }

    /// Logins of every user of the project.
    pub fn users(&self) -> Result<Vec<String>> {
        self.logins(None)
    }
    pub fn owners(&self) -> Result<Vec<String>> {
        self.logins(Some(Role::Owner.group()))
    }
    pub fn members(&self) -> Result<Vec<String>> {
        self.logins(Some(Role::Member.group()))
    }
    pub fn collaborators(&self) -> Result<Vec<String>> {
        self.logins(Some(Role::Collaborator.group()))
    }

    /// Role of `login` in the project, `None` if not a user of it.
    pub fn user_role(&self, login: &str) -> Result<Option<Role>> {
        self.expect_node(&["projects"], "user_role")?;
        let rows = self
            .interface()
            .get_json(&format!("{}?format=json", uri::join(self.uri(), &["users"])))?;
        rows.iter()
            .find(|row| row.get("login").map(String::as_str) == Some(login))
            .and_then(|row| row.get("displayname"))
            .map(|group| group.parse())
            .transpose()
    }

    /// Adds an existing server user to the project.
    pub fn add_user(&self, login: &str, role: Role) -> Result<()> {
        self.project_put(&["users", role.group(), login])
    }

    pub fn remove_user(&self, login: &str) -> Result<()> {
        let role = self.user_role(login)?.ok_or_else(|| {
            RestreeError::Data(format!("{login} is not a user of {}", self.name()))
        })?;
        info!("removing {} from {}", login, self.uri());
        let target = uri::join(self.uri(), &["users", role.group(), login]);
        send(self.interface(), &target, Method::Delete).map(|_| ())
    }

    fn project_id(&self) -> Result<String> {
        Ok(self.identifier()?.unwrap_or_else(|| self.name().to_string()))
    }

    /// Experiments of the project, across its subjects.
    pub fn project_experiments(&self, pattern: &str) -> Result<Collection> {
        self.expect_node(&["projects"], "project_experiments")?;
        let intf = self.interface();
        let template = uri::join(intf.entry_point(), &["projects", &self.project_id()?, "experiments"]);
        Ok(Collection::from_template(&template, intf).with_pattern(pattern))
    }

    /// Experiment `id` of the project. A label is resolved to the
    /// experiment's identifier.
    pub fn project_experiment(&self, id: &str) -> Result<Element> {
        self.expect_node(&["projects"], "project_experiment")?;
        let intf = self.interface();
        let base = uri::join(intf.entry_point(), &["projects", &self.project_id()?, "experiments"]);
        let experiment = Element::new(&uri::join(&base, &[id]), intf);
        match experiment.identifier()? {
            Some(actual) if actual != id => Ok(Element::new(&uri::join(&base, &[&actual]), intf)),
            _ => Ok(experiment),
        }
    }

    /// Subject identifier to last modification date.
    pub fn last_modified(&self) -> Result<BTreeMap<String, String>> {
        self.expect_node(&["projects"], "last_modified")?;
        let query = format!(
            "{}?format=json&columns=ID,last_modified",
            uri::join(self.uri(), &["subjects"])
        );
        Ok(self
            .interface()
            .get_json(&query)?
            .into_iter()
            .filter_map(|mut row| Some((row.remove("ID")?, row.remove("last_modified")?)))
            .collect())
    }

    // ------------- Sharing -------------
    /// Projects this element is shared into.
    pub fn shares(&self, pattern: &str) -> Result<Collection> {
        self.expect_node(&SHAREABLE, "shares")?;
        let intf = self.interface();
        Ok(Collection::from_template(&uri::join(self.uri(), &["projects"]), intf).with_pattern(pattern))
    }

    pub fn share(&self, project: &str) -> Result<()> {
        self.expect_node(&SHAREABLE, "share")?;
        info!("sharing {} into {}", self.uri(), project);
        send(self.interface(), &uri::join(self.uri(), &["projects", project]), Method::Put).map(|_| ())
    }

    pub fn unshare(&self, project: &str) -> Result<()> {
        self.expect_node(&SHAREABLE, "unshare")?;
        info!("unsharing {} from {}", self.uri(), project);
        send(self.interface(), &uri::join(self.uri(), &["projects", project]), Method::Delete)
            .map(|_| ())
    }

    // ------------- Experiments -------------
    /// Runs the requested post-archive steps in one call. Nothing is sent
    /// when no step is requested.
    pub fn trigger(&self, triggers: Triggers) -> Result<()> {
        self.expect_node(&["experiments"], "trigger")?;
        let options = triggers.options();
        if options.is_empty() {
            return Ok(());
        }
        info!("triggering {:?} on {}", options, self.uri());
        send(
            self.interface(),
            &format!("{}?{}", self.uri(), options.join("&")),
            Method::Put,
        )
        .map(|_| ())
    }

    /// Launches the AutoRun pipeline.
    pub fn trigger_pipelines(&self) -> Result<()> {
        self.trigger(Triggers { pipelines: true, fix_types: false, scan_headers: false })
    }

    /// Fills empty scan types from similar scans.
    pub fn fix_scan_types(&self) -> Result<()> {
        self.trigger(Triggers { pipelines: false, fix_types: true, scan_headers: false })
    }

    pub fn pull_data_from_headers(&self) -> Result<()> {
        self.trigger(Triggers { pipelines: false, fix_types: false, scan_headers: true })
    }

    // ------------- Parameters -------------
    /// Names of the additional parameters.
    pub fn params(&self) -> Result<Vec<String>> {
        self.expect_node(&PARAMETERIZED, "params")?;
        self.xpath("//xnat:addParam/attribute::*")
    }

    pub fn get_param(&self, key: &str) -> Result<Option<String>> {
        self.expect_node(&PARAMETERIZED, "get_param")?;
        let path = format!("//xnat:addParam[@name={}]/child::text()", xpath::quote(key)?);
        let values = self.xpath(&path)?;
        Ok(values.into_iter().last())
    }

    /// Values of the additional parameters, in document order.
    pub fn get_params(&self) -> Result<Vec<String>> {
        self.expect_node(&PARAMETERIZED, "get_params")?;
        self.xpath("//xnat:addParam/child::text()")
    }
}

impl Collection {
    fn expect_shareable(&self, operation: &str) -> Result<()> {
        match self.node_name() {
            Some(name) if SHAREABLE.contains(&name.as_str()) => Ok(()),
            name => Err(RestreeError::Programming(format!(
                "{operation} is not available on {} collections",
                name.unwrap_or_else(|| "untyped".to_string())
            ))),
        }
    }

    /// Members shared into every one of `projects`.
    pub fn sharing(&self, projects: &[&str]) -> Result<Collection> {
        self.expect_shareable("sharing")?;
        let mut kept = Vec::new();
        for element in self.iter() {
            let shared = match element.shares(uri::WILDCARD)?.get(&[]) {
                Fetched::Identifiers(ids) => ids,
                _ => Vec::new(),
            };
            if projects.iter().all(|p| shared.iter().any(|s| s == p)) {
                kept.push(element);
            }
        }
        let mut shared = Collection::from_elements(kept, self.interface());
        if let Some(node) = self.node_name() {
            shared = shared.with_node(&node);
        }
        Ok(shared)
    }

    pub fn share(&self, project: &str) -> Result<()> {
        self.expect_shareable("share")?;
        self.iter().try_for_each(|element| element.share(project))
    }

    pub fn unshare(&self, project: &str) -> Result<()> {
        self.expect_shareable("unshare")?;
        self.iter().try_for_each(|element| element.unshare(project))
    }
}
