//! Result type definition and the entity-scoping combinator.

use crate::error::Error;

/// The standard Result type for habsync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait sorting errors into the two propagation families.
pub trait ResultExt<T> {
    /// Keep entity-level errors as an inner value and propagate the rest.
    ///
    /// `Ok(Ok(v))` is a success, `Ok(Err(e))` an entity-level failure the
    /// caller records before moving to the next entity, and `Err(e)` a
    /// foundational failure that must stop the caller.
    ///
    /// # Errors
    ///
    /// Returns the original error when it is not entity-level.
    fn entity_scoped(self) -> Result<Result<T>>;
}

impl<T> ResultExt<T> for Result<T> {
    fn entity_scoped(self) -> Result<Result<T>> {
        match self {
            Ok(value) => Ok(Ok(value)),
            Err(e) if e.is_entity_level() => Ok(Err(e)),
            Err(e) => Err(e),
        }
    }
}
