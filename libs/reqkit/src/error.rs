use thiserror::Error;

/// Errors raised while bootstrapping a request outside of the HTTP pipeline.
///
/// Both variants are raised before any thread-local state is pushed.
#[derive(Debug, Error)]
pub enum ScriptingError {
    /// `prepare()` could not resolve a registry from its arguments or the global set.
    #[error(
        "no valid applications could be found, make sure one has been created before trying to activate it"
    )]
    NoApplication,

    /// A request had to be built but no registry was given and none is registered globally.
    #[error("no registry supplied and no application registry is registered globally")]
    NoRegistry,
}

impl ScriptingError {
    /// Setup problems the caller has to fix by creating an application first.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, ScriptingError::NoApplication)
    }
}
