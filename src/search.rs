//! Search collaborator.
//!
//! Searches are XML bundles (`xdat:bundle`) POSTed to the search endpoint:
//! the requested columns as search fields and the constraints as a tree of
//! `search_where` / `child_set` criteria. Saved searches and templates come
//! back in the same format, so [`query_from_xml`] can recover their
//! constraints.

use std::collections::BTreeMap;
use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::debug;

use crate::constraint::{self, Criterion, Filter, Junction, Term};
use crate::error::{RestreeError, Result};
use crate::interface::Interface;
use crate::transport::{self, Method, Row};

const XDAT_NAMESPACE: &str = "http://nrg.wustl.edu/security";
const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn text_element(writer: &mut XmlWriter, name: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_criteria(writer: &mut XmlWriter, container: &str, filter: &[Term]) -> Result<()> {
    let junction = constraint::junction_of(filter);
    let mut start = BytesStart::new(container);
    start.push_attribute(("method", junction.as_str()));
    writer.write_event(Event::Start(start))?;
    for term in filter {
        match term {
            Term::Junction(_) => {}
            Term::Group(group) => write_criteria(writer, "xdat:child_set", group)?,
            Term::Criterion(criterion) => {
                let mut node = BytesStart::new("xdat:criteria");
                node.push_attribute(("override_value_formatting", "0"));
                writer.write_event(Event::Start(node))?;
                text_element(writer, "xdat:schema_field", &criterion.field)?;
                text_element(writer, "xdat:comparison_type", &criterion.comparison)?;
                text_element(writer, "xdat:value", &criterion.value)?;
                writer.write_event(Event::End(BytesEnd::new("xdat:criteria")))?;
            }
        }
    }
    writer.write_event(Event::End(BytesEnd::new(container)))?;
    Ok(())
}

/// Renders the search bundle for `root_type`, returning `columns`
/// (`datatype/FIELD`) of the entities matching `filter`.
pub fn build_search_document(root_type: &str, columns: &[&str], filter: &[Term]) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let id = format!("@{root_type}");
    let mut bundle = BytesStart::new("xdat:bundle");
    bundle.push_attribute(("xmlns:xdat", XDAT_NAMESPACE));
    bundle.push_attribute(("xmlns:xsi", XSI_NAMESPACE));
    bundle.push_attribute(("ID", id.as_str()));
    bundle.push_attribute(("brief-description", ""));
    bundle.push_attribute(("allow-diff-columns", "0"));
    bundle.push_attribute(("secure", "false"));
    writer.write_event(Event::Start(bundle))?;

    text_element(&mut writer, "xdat:root_element_name", root_type)?;
    for (sequence, column) in columns.iter().enumerate() {
        let (element_name, field_id) = column.split_once('/').ok_or_else(|| {
            RestreeError::Programming(format!("column '{column}' is not datatype/FIELD"))
        })?;
        writer.write_event(Event::Start(BytesStart::new("xdat:search_field")))?;
        text_element(&mut writer, "xdat:element_name", element_name)?;
        text_element(&mut writer, "xdat:field_ID", field_id)?;
        text_element(&mut writer, "xdat:sequence", &sequence.to_string())?;
        text_element(&mut writer, "xdat:type", "string")?;
        text_element(&mut writer, "xdat:header", column)?;
        writer.write_event(Event::End(BytesEnd::new("xdat:search_field")))?;
    }
    write_criteria(&mut writer, "xdat:search_where", filter)?;
    writer.write_event(Event::End(BytesEnd::new("xdat:bundle")))?;

    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| RestreeError::parse(e.to_string()))
}

/// Runs a search and returns its JSON table. Result columns are keyed by
/// the lowercase field ID.
pub fn search(intf: &Interface, root_type: &str, columns: &[&str], filter: &[Term]) -> Result<Vec<Row>> {
    let bundle = build_search_document(root_type, columns, filter)?;
    let uri = format!("{}/search?format=json", intf.entry_point());
    let headers = [("Content-Type".to_string(), "text/xml".to_string())];
    debug!("searching {} for {:?}", root_type, columns);
    let content = intf.execute(&uri, Method::Post, Some(bundle.as_bytes()), &headers)?;
    transport::parse_json_table(&content)
}

fn fetch_document(intf: &Interface, name: &str) -> Result<String> {
    let uri = format!("{}/search/saved/{}?format=xml", intf.entry_point(), urlencoding::encode(name));
    let document = intf.execute(&uri, Method::Get, None, &[])?;
    if transport::is_error_page(&document) {
        return Err(RestreeError::Data(transport::error_description(&document)));
    }
    Ok(document)
}

/// The bundle of a saved search.
pub fn saved_search(intf: &Interface, name: &str) -> Result<String> {
    fetch_document(intf, name)
}

/// The bundle of a search template with its `%(key)s` placeholders
/// substituted. Templates are saved searches whose name starts with `@`.
pub fn template(intf: &Interface, name: &str, params: &BTreeMap<String, String>) -> Result<String> {
    let stored = if name.starts_with('@') { name.to_string() } else { format!("@{name}") };
    let document = fetch_document(intf, &stored)?;
    Ok(substitute(&document, params))
}

/// Replaces `%(key)s` placeholders. Unknown placeholders are left as is.
pub fn substitute(template: &str, params: &BTreeMap<String, String>) -> String {
    let mut document = template.to_string();
    for (key, value) in params {
        document = document.replace(&format!("%({key})s"), value);
    }
    document
}

/// What a search bundle asks for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchDocument {
    pub root_type: Option<String>,
    pub columns: Vec<String>,
    pub constraints: Filter,
}

#[derive(Default)]
struct Frame {
    terms: Filter,
    junction: Option<Junction>,
}

#[derive(Default)]
struct PartialCriterion {
    field: String,
    comparison: String,
    value: String,
}

#[derive(Default)]
struct PartialField {
    element_name: String,
    field_id: String,
}

/// Recovers root type, columns and constraints from a search bundle.
pub fn query_from_xml(xml: &str) -> Result<SearchDocument> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parsed = SearchDocument::default();
    let mut frames: Vec<Frame> = Vec::new();
    let mut criterion: Option<PartialCriterion> = None;
    let mut field: Option<PartialField> = None;
    let mut current_tag = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                let local = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                match local.as_str() {
                    "search_where" | "child_set" => {
                        let mut frame = Frame::default();
                        for attribute in start.attributes() {
                            let attribute = attribute?;
                            if attribute.key.local_name().as_ref() == b"method" {
                                let method = attribute.unescape_value()?;
                                frame.junction = Junction::parse(&method.to_uppercase());
                            }
                        }
                        frames.push(frame);
                    }
                    "criteria" => criterion = Some(PartialCriterion::default()),
                    "search_field" => field = Some(PartialField::default()),
                    _ => {}
                }
                current_tag = local;
            }
            Event::Text(text) => {
                let text = text.unescape()?.into_owned();
                match (current_tag.as_str(), criterion.as_mut(), field.as_mut()) {
                    ("schema_field", Some(c), _) => c.field = text,
                    ("comparison_type", Some(c), _) => c.comparison = text,
                    ("value", Some(c), _) => c.value = text,
                    ("element_name", _, Some(f)) => f.element_name = text,
                    ("field_ID", _, Some(f)) => f.field_id = text,
                    ("root_element_name", _, _) => parsed.root_type = Some(text),
                    _ => {}
                }
            }
            Event::End(end) => {
                let local = String::from_utf8_lossy(end.local_name().as_ref()).into_owned();
                match local.as_str() {
                    "criteria" => {
                        if let (Some(c), Some(frame)) = (criterion.take(), frames.last_mut()) {
                            frame.terms.push(Term::Criterion(Criterion {
                                field: c.field,
                                comparison: c.comparison,
                                value: c.value,
                            }));
                        }
                    }
                    "search_field" => {
                        if let Some(f) = field.take() {
                            parsed.columns.push(format!("{}/{}", f.element_name, f.field_id));
                        }
                    }
                    "child_set" | "search_where" => {
                        if let Some(frame) = frames.pop() {
                            let mut terms = frame.terms;
                            terms.push(Term::Junction(frame.junction.unwrap_or(Junction::And)));
                            match frames.last_mut() {
                                Some(parent) => parent.terms.push(Term::Group(terms)),
                                None => parsed.constraints = terms,
                            }
                        }
                    }
                    _ => {}
                }
                current_tag.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(parsed)
}
