//! Error types for the bridge.

use std::path::PathBuf;

use duplex_types::ValueError;

/// Errors raised by the bridge
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("No factory registered for '{0}'")]
    FactoryNotFound(String),

    #[error("Failed to create object of type '{type_name}': {source}")]
    FailedObjectCreation {
        type_name: String,
        #[source]
        source: Box<BridgeError>,
    },

    #[error("Invalid type: {0}")]
    InvalidType(String),

    #[error("No id found: {0}")]
    NoIdFound(String),

    #[error("Serialize error: {message}")]
    Serialize {
        message: String,
        #[source]
        source: Option<Box<BridgeError>>,
    },

    #[error("Unsupported value: {0}")]
    Unsupported(String),

    #[error("Object id {0} is not registered")]
    UnknownId(u64),

    #[error("Object id {0} is already registered")]
    DuplicateId(u64),

    #[error("A factory is already registered for '{0}'")]
    DuplicateFactory(String),

    #[error("Object id space exhausted, restart required")]
    RestartRequired,

    #[error("Script handle has been released")]
    Released,

    #[error("Bridge is closed")]
    Closed,

    #[error(transparent)]
    ScriptNotFound(#[from] ScriptNotFound),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("JavaScript error: {0}")]
    Script(String),

    #[error("Engine error: {0}")]
    Engine(#[from] rquickjs::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Native(#[from] anyhow::Error),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    pub fn creation(type_name: impl Into<String>, source: BridgeError) -> Self {
        BridgeError::FailedObjectCreation {
            type_name: type_name.into(),
            source: Box::new(source),
        }
    }

    pub fn serialize(message: impl Into<String>) -> Self {
        BridgeError::Serialize {
            message: message.into(),
            source: None,
        }
    }

    pub fn serialize_caused(message: impl Into<String>, source: BridgeError) -> Self {
        BridgeError::Serialize {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<ValueError> for BridgeError {
    fn from(e: ValueError) -> Self {
        BridgeError::InvalidType(e.to_string())
    }
}

/// A module path that none of the search locations could resolve
#[derive(Debug, Clone, thiserror::Error)]
#[error("Script '{path}' not found in {search_paths:?}")]
pub struct ScriptNotFound {
    pub path: String,
    pub search_paths: Vec<PathBuf>,
}

/// Misconfigured binding metadata for a native type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DescriptorError {
    #[error("Type '{0}' declares no id field")]
    MissingId(&'static str),

    #[error("Type '{0}' declares no module path")]
    MissingModulePath(&'static str),

    #[error("Type '{0}' declares no constructor")]
    MissingConstructor(&'static str),

    #[error("Type '{type_name}' declares '{member}' more than once")]
    DuplicateMember {
        type_name: &'static str,
        member: String,
    },
}

/// Errors loading configuration files
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Errors talking to an engine running on its own thread
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error("Engine has terminated")]
    Terminated,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Engine thread panicked")]
    ThreadPanic,

    #[error("Engine failed to start: {0}")]
    Startup(String),

    #[error("Engine failed to close: {0}")]
    Close(String),

    #[error("Failed to spawn thread: {0}")]
    SpawnFailed(#[from] std::io::Error),
}
