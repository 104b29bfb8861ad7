//! Client-side service descriptions
//!
//! A description names a remote service and declares each of its methods
//! with the request and response types the caller will use. The client
//! checks stubs against it, so a typo in a method name or a type mix-up is
//! caught when the stub is built rather than on the wire.

use std::any::{type_name, TypeId};
use std::collections::HashSet;
use thiserror::Error;

use crate::protocol::{FIELD_SEPARATOR, PAIR_SEPARATOR};

/// Malformed service descriptions and handler tables
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptionError {
    #[error("Service name must not be empty")]
    EmptyServiceName,

    #[error("Method names of {0} must not be empty")]
    EmptyMethodName(String),

    #[error("Name {0:?} contains a line feed or carriage return")]
    InvalidName(String),

    #[error("Method {method} is declared twice on {service}")]
    DuplicateMethod { service: String, method: String },

    #[error("Service {0} has no methods")]
    NoMethods(String),

    #[error("Service {0} is already registered")]
    DuplicateService(String),
}

pub type DescriptionResult<T> = Result<T, DescriptionError>;

/// Names travel inside newline separated frame headers
pub(crate) fn check_name(name: &str) -> DescriptionResult<()> {
    if name
        .bytes()
        .any(|b| b == FIELD_SEPARATOR || b == PAIR_SEPARATOR)
    {
        return Err(DescriptionError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Shared checks for a service name and its method names
pub(crate) fn check_names<'a>(
    service: &str,
    methods: impl IntoIterator<Item = &'a str>,
) -> DescriptionResult<()> {
    if service.is_empty() {
        return Err(DescriptionError::EmptyServiceName);
    }
    check_name(service)?;

    let mut seen = HashSet::new();
    for method in methods {
        if method.is_empty() {
            return Err(DescriptionError::EmptyMethodName(service.to_string()));
        }
        check_name(method)?;
        if !seen.insert(method) {
            return Err(DescriptionError::DuplicateMethod {
                service: service.to_string(),
                method: method.to_string(),
            });
        }
    }

    if seen.is_empty() {
        return Err(DescriptionError::NoMethods(service.to_string()));
    }
    Ok(())
}

/// One declared remote method
#[derive(Debug, Clone)]
pub struct MethodDescription {
    name: String,
    request_type: TypeId,
    response_type: TypeId,
    request_type_name: &'static str,
    response_type_name: &'static str,
}

impl MethodDescription {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this method was declared with exactly these types
    pub fn accepts<Req: 'static, Resp: 'static>(&self) -> bool {
        self.request_type == TypeId::of::<Req>() && self.response_type == TypeId::of::<Resp>()
    }

    /// `Req -> Resp` as declared
    pub fn signature(&self) -> String {
        format!("{} -> {}", self.request_type_name, self.response_type_name)
    }
}

/// A named remote service and its methods
#[derive(Debug, Clone)]
pub struct ServiceDescription {
    name: String,
    methods: Vec<MethodDescription>,
}

impl ServiceDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Declare a method taking `Req` and answering with `Resp`
    pub fn method<Req: 'static, Resp: 'static>(mut self, name: impl Into<String>) -> Self {
        self.methods.push(MethodDescription {
            name: name.into(),
            request_type: TypeId::of::<Req>(),
            response_type: TypeId::of::<Resp>(),
            request_type_name: type_name::<Req>(),
            response_type_name: type_name::<Resp>(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[MethodDescription] {
        &self.methods
    }

    pub fn find(&self, method: &str) -> Option<&MethodDescription> {
        self.methods.iter().find(|m| m.name == method)
    }

    /// Reject empty or separator-bearing names and duplicate methods
    pub fn validate(&self) -> DescriptionResult<()> {
        check_names(&self.name, self.methods.iter().map(|m| m.name.as_str()))
    }
}
