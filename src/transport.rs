//! Transport collaborator.
//!
//! The core only needs a handful of blocking round trips: execute a method
//! against a URI, read a JSON table, read response headers. [`Transport`]
//! is that seam; [`HttpTransport`] is the `reqwest` implementation used by
//! `Interface::connect`. This module also knows how the remote service
//! reports errors, as HTML pages instead of the requested format.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::config::Settings;
use crate::error::{RestreeError, Result};

/// One row of a tabular listing, column name to cell text.
pub type Row = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
    Head,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Transport: Send + Sync {
    /// Executes `method` against `uri` (path and query, relative to the
    /// server) and returns the response body.
    fn execute(
        &self,
        uri: &str,
        method: Method,
        body: Option<&[u8]>,
        headers: &[(String, String)],
    ) -> Result<String>;

    fn get_json_table(&self, uri: &str) -> Result<Vec<Row>> {
        let content = self.execute(uri, Method::Get, None, &[])?;
        parse_json_table(&content)
    }

    fn get_head(&self, uri: &str) -> Result<Vec<(String, String)>>;

    /// Re-establishes the connection after an interrupted iteration.
    fn reconnect(&self) -> Result<()> {
        Ok(())
    }
}

// ------------- JSON tables -------------
fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Decodes `{"ResultSet": {"Result": [...]}}` or a bare array of objects.
pub fn parse_json_table(content: &str) -> Result<Vec<Row>> {
    if is_error_page(content) {
        return Err(RestreeError::Transport(error_description(content)));
    }
    let value: Value = serde_json::from_str(content)?;
    let rows = match &value {
        Value::Array(rows) => rows,
        Value::Object(_) => match value.pointer("/ResultSet/Result") {
            Some(Value::Array(rows)) => rows,
            _ => return Err(RestreeError::parse("JSON table without ResultSet.Result")),
        },
        _ => return Err(RestreeError::parse("JSON table is neither an object nor an array")),
    };
    let mut table = Vec::with_capacity(rows.len());
    for row in rows {
        match row {
            Value::Object(fields) => {
                table.push(fields.iter().map(|(k, v)| (k.clone(), cell(v))).collect());
            }
            _ => return Err(RestreeError::parse("JSON table row is not an object")),
        }
    }
    Ok(table)
}

// ------------- Error pages -------------
lazy_static! {
    static ref RE_QUOTED: Regex = Regex::new(r"'([^']*)'").unwrap();
    static ref RE_TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
}

pub fn is_error_page(content: &str) -> bool {
    let content = content.trim_start();
    content.starts_with("<!DOCTYPE") || content.starts_with("<html>")
}

fn between<'a>(content: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = content.find(open)? + open.len();
    let rest = &content[start..];
    Some(match rest.find(close) {
        Some(end) => &rest[..end],
        None => rest,
    })
}

/// Human readable message of an error page.
pub fn error_description(content: &str) -> String {
    let raw = between(content, "<h3>", "</h3>")
        .or_else(|| between(content, "<b>description</b>", "</p>"))
        .or_else(|| between(content, "<title>", "</title>"))
        .unwrap_or(content);
    RE_TAG.replace_all(raw, "").trim().to_string()
}

/// Decodes a structural creation error into `(datatype, element)` pairs,
/// one per line that names both.
pub fn parse_put_error(content: &str) -> Vec<(String, String)> {
    let description = error_description(content);
    let mut required = Vec::new();
    for line in description.lines() {
        let quoted: Vec<&str> = RE_QUOTED
            .captures_iter(line)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        if quoted.len() < 2 {
            continue;
        }
        let Some((_, element)) = quoted[1].rsplit_once(':') else {
            continue;
        };
        let element = element.trim_matches(|c| c == '}' || c == '\'' || c == '"');
        if element.is_empty() {
            continue;
        }
        required.push((quoted[0].to_string(), element.to_string()));
    }
    required
}

// ------------- HTTP -------------
pub struct HttpTransport {
    server: String,
    user: Option<String>,
    password: Option<String>,
    timeout: Option<Duration>,
    client: Mutex<reqwest::blocking::Client>,
}

impl HttpTransport {
    pub fn new(settings: &Settings) -> Result<Self> {
        let timeout = settings.timeout_secs.map(Duration::from_secs);
        Ok(Self {
            server: settings.server.clone(),
            user: settings.user.clone(),
            password: settings.password.clone(),
            timeout,
            client: Mutex::new(build_client(timeout)?),
        })
    }

    fn client(&self) -> Result<reqwest::blocking::Client> {
        self.client
            .lock()
            .map(|client| client.clone())
            .map_err(|e| RestreeError::Lock(e.to_string()))
    }

    fn request(
        &self,
        uri: &str,
        method: Method,
    ) -> Result<reqwest::blocking::RequestBuilder> {
        let url = format!("{}{}", self.server, uri);
        let method = match method {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
        };
        let mut request = self.client()?.request(method, url);
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_ref());
        }
        Ok(request)
    }
}

fn build_client(timeout: Option<Duration>) -> Result<reqwest::blocking::Client> {
    let mut builder = reqwest::blocking::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build()?)
}

impl Transport for HttpTransport {
    fn execute(
        &self,
        uri: &str,
        method: Method,
        body: Option<&[u8]>,
        headers: &[(String, String)],
    ) -> Result<String> {
        let mut request = self.request(uri, method)?;
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.body(body.to_vec());
        }
        let response = request.send()?;
        debug!("{} {} -> {}", method, uri, response.status());
        Ok(response.text()?)
    }

    fn get_head(&self, uri: &str) -> Result<Vec<(String, String)>> {
        let response = self.request(uri, Method::Head)?.send()?;
        Ok(response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect())
    }

    fn reconnect(&self) -> Result<()> {
        let fresh = build_client(self.timeout)?;
        let mut client = self
            .client
            .lock()
            .map_err(|e| RestreeError::Lock(e.to_string()))?;
        *client = fresh;
        Ok(())
    }
}
