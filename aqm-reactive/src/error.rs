use thiserror::Error;

/// Errors from the derived value graph. These indicate misuse of the
/// graph API, not failures of upstream sources.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("unknown node #{0}")]
    UnknownNode(usize),

    #[error("node {0} is derived and cannot be set directly")]
    NotASource(String),

    #[error("node {0} holds a value of a different type")]
    TypeMismatch(String),

    #[error("node {node} did not declare {input} as an input")]
    UndeclaredInput { node: String, input: String },

    #[error("input {0} has no value yet")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    #[error("resource {0} is not reloadable")]
    NotReloadable(String),
}
