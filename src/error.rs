use std::{error, fmt, io};

/// Registry loading errors. All of these abort the load; a partially
/// constructed registry is never returned.
#[derive(Debug)]
pub enum Error {
    /// The registry file could not be read.
    Io(io::Error),
    /// The document is not well-formed XML.
    Parse(roxmltree::Error),
    /// The document is well-formed but structurally unexpected, e.g. a
    /// missing required attribute or an undecodable declarator token.
    Schema(String),
    /// A type reference survived both resolution sweeps.
    UnresolvedReference(String),
    /// A forced-allow filter entry names an extension the registry does not
    /// contain.
    FilterInconsistency(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read registry: {err}"),
            Self::Parse(err) => write!(f, "malformed registry XML: {err}"),
            Self::Schema(msg) => write!(f, "unexpected registry content: {msg}"),
            Self::UnresolvedReference(name) => {
                write!(f, "unresolved type reference `{name}`")
            }
            Self::FilterInconsistency(name) => {
                write!(f, "allowed extension `{name}` is not in the registry")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<roxmltree::Error> for Error {
    fn from(err: roxmltree::Error) -> Error {
        Error::Parse(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
