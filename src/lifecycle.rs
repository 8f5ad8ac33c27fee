//! Explicit resource lifecycle shared by components that hold open handles.
//!
//! Components compose small orthogonal capabilities instead of inheriting a
//! filter base class; this is the one capability with teeth: the owner of an
//! index writer or replay reader must drive it through commit or rollback on
//! every exit path.

use crate::errors::SpanError;

/// Prepare/commit/rollback capability for handle-owning components.
pub trait Lifecycle {
    /// Make the component ready for use (re-arms a rolled-back component).
    fn prepare(&mut self) -> Result<(), SpanError> {
        Ok(())
    }

    /// Finish normally, flushing and closing held resources.
    fn commit(&mut self) -> Result<(), SpanError>;

    /// Abort, releasing held resources; the component may refuse further use
    /// until prepared again.
    fn rollback(&mut self) -> Result<(), SpanError>;
}
