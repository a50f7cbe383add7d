//! Thrown values and foreign async handles.
//!
//! User code signals failure or a missing dependency by returning `Err` from
//! its render body. Errors unwind to the nearest boundary; pending thenables
//! suspend the work loop, which registers a continuation and yields. The
//! reconciler never awaits anything itself.

use std::rc::Rc;

/// A shared, clonable error value as thrown by user code or the host.
pub type ThrownError = Rc<anyhow::Error>;

/// A foreign promise-like handle.
///
/// The reconciler only ever asks for the current status and registers
/// settle callbacks; reading the resolved value is the component's own
/// business on the replayed render.
pub trait Thenable {
    fn status(&self) -> ThenableStatus;

    /// Register a callback invoked once when the thenable settles. If the
    /// thenable is already settled the callback fires immediately.
    fn subscribe(&self, on_settle: Box<dyn FnOnce()>);
}

/// Observable state of a [`Thenable`].
#[derive(Clone)]
pub enum ThenableStatus {
    Pending,
    Fulfilled,
    Rejected(ThrownError),
}

/// A value thrown out of user code during render.
#[derive(Clone)]
pub enum Thrown {
    /// A plain error; unwinds to the nearest error boundary.
    Error(ThrownError),
    /// A pending dependency; suspends the work loop until it settles.
    Suspend(Rc<dyn Thenable>),
}

impl Thrown {
    pub fn error(err: anyhow::Error) -> Self {
        Thrown::Error(Rc::new(err))
    }
}

impl std::fmt::Debug for Thrown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Thrown::Error(err) => f.debug_tuple("Error").field(err).finish(),
            Thrown::Suspend(_) => f.write_str("Suspend(..)"),
        }
    }
}
