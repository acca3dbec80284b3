use thiserror::Error;

#[derive(Error, Debug)]
pub enum RestreeError {
    #[error("Addressing error: {0}")]
    Addressing(String),
    #[error("Data error: {0}")]
    Data(String),
    #[error("Programming error: {0}")]
    Programming(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Cache error: {0}")]
    Cache(String),
    #[error("Parse error: {message}")]
    Parse { message: String },
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, RestreeError>;

impl RestreeError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse { message: message.into() }
    }
    /// Faults raised while talking to the remote service.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

// Helper conversions
impl From<std::io::Error> for RestreeError {
    fn from(e: std::io::Error) -> Self { Self::Cache(e.to_string()) }
}
impl From<serde_json::Error> for RestreeError {
    fn from(e: serde_json::Error) -> Self { Self::parse(e.to_string()) }
}
impl From<reqwest::Error> for RestreeError {
    fn from(e: reqwest::Error) -> Self { Self::Transport(e.to_string()) }
}
impl From<config::ConfigError> for RestreeError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
impl From<quick_xml::Error> for RestreeError {
    fn from(e: quick_xml::Error) -> Self { Self::parse(e.to_string()) }
}
impl From<quick_xml::events::attributes::AttrError> for RestreeError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self { Self::parse(e.to_string()) }
}
