#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use restree::{Interface, Method, RestreeError, Result, Settings, Transport};
use serde_json::{Map, Value, json};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub body: Option<String>,
}

/// In-memory transport answering from canned responses. A response is keyed
/// by method and either the full URI or its path alone; full URIs win, and
/// the latest registration wins among equals. Unscripted requests fail like
/// a dropped connection.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<Vec<(Method, String, String)>>,
    requests: Mutex<Vec<Request>>,
    reconnects: Mutex<usize>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, method: Method, uri: &str, body: &str) {
        self.responses
            .lock()
            .unwrap()
            .push((method, uri.to_string(), body.to_string()));
    }

    pub fn respond_table(&self, uri: &str, rows: Value) {
        self.respond(Method::Get, uri, &table(rows));
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn uris(&self, method: Method) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .map(|r| r.uri)
            .collect()
    }

    pub fn reconnects(&self) -> usize {
        *self.reconnects.lock().unwrap()
    }

    fn lookup(&self, method: Method, uri: &str) -> Option<String> {
        let responses = self.responses.lock().unwrap();
        let path = uri.split('?').next().unwrap_or(uri);
        let find = |key: &str| {
            responses
                .iter()
                .rev()
                .find(|(m, u, _)| *m == method && u == key)
                .map(|(_, _, body)| body.clone())
        };
        find(uri).or_else(|| find(path))
    }
}

impl Transport for ScriptedTransport {
    fn execute(
        &self,
        uri: &str,
        method: Method,
        body: Option<&[u8]>,
        _headers: &[(String, String)],
    ) -> Result<String> {
        self.requests.lock().unwrap().push(Request {
            method,
            uri: uri.to_string(),
            body: body.map(|b| String::from_utf8_lossy(b).into_owned()),
        });
        self.lookup(method, uri)
            .ok_or_else(|| RestreeError::Transport(format!("connection refused: {method} {uri}")))
    }

    fn get_head(&self, _uri: &str) -> Result<Vec<(String, String)>> {
        Ok(Vec::new())
    }

    fn reconnect(&self) -> Result<()> {
        *self.reconnects.lock().unwrap() += 1;
        Ok(())
    }
}

/// A `ResultSet` JSON table.
pub fn table(rows: Value) -> String {
    json!({ "ResultSet": { "Result": rows } }).to_string()
}

/// Rows with one column.
pub fn column(name: &str, values: &[&str]) -> Value {
    Value::Array(
        values
            .iter()
            .map(|v| {
                let mut row = Map::new();
                row.insert(name.to_string(), Value::String(v.to_string()));
                Value::Object(row)
            })
            .collect(),
    )
}

pub struct Fixture {
    pub intf: Interface,
    pub transport: Arc<ScriptedTransport>,
    pub cache: TempDir,
}

pub fn settings(cache: &TempDir) -> Settings {
    Settings::default()
        .with_cache_dir(cache.path())
        .with_learning(false, 30)
}

pub fn setup_with(configure: impl FnOnce(Settings) -> Settings) -> Fixture {
    let cache = TempDir::new().unwrap();
    let transport = ScriptedTransport::new();
    let intf = Interface::new(transport.clone(), configure(settings(&cache))).unwrap();
    Fixture { intf, transport, cache }
}

pub fn setup() -> Fixture {
    setup_with(|settings| settings)
}

pub fn names(elements: &[restree::Element]) -> Vec<String> {
    elements.iter().map(|e| e.name().to_string()).collect()
}

pub const ERROR_PAGE: &str = "<!DOCTYPE html><html><head><title>Status page</title></head>\
<body><h3>The element does not exist</h3></body></html>";
