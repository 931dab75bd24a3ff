//! Interrupt-dispatch collaborator surface.

use std::sync::Arc;

use bitflags::bitflags;
use thiserror::Error;

/// Verdict returned by a top-half interrupt handler.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IrqReturn {
    /// The interrupt belonged to this device and has been dealt with.
    Handled,
    /// Not this device's interrupt (possible on shared legacy lines); the dispatcher
    /// should keep asking the other handlers registered on the line.
    NotMine,
}

bitflags! {
    /// Registration flags for an interrupt line.
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct IrqFlags: u32 {
        /// The line may be shared with other devices; the handler must tolerate being
        /// invoked for interrupts that are not its own.
        const SHARED = 1 << 0;
    }
}

/// A registered top-half handler.
///
/// Handlers run in interrupt context: they must not allocate, must not block, and must
/// complete in bounded time. They are shared with the dispatcher, hence `Arc`.
pub type IrqHandler = Arc<dyn Fn() -> IrqReturn + Send + Sync>;

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum IrqError {
    #[error("line {line} is already claimed and cannot be shared")]
    LineBusy { line: u32 },
    #[error("handler registration rejected for line {line}")]
    Rejected { line: u32 },
}

/// Registers and unregisters top-half handlers with the host's interrupt dispatch.
pub trait IrqDispatcher: Send + Sync {
    fn register_handler(
        &self,
        line: u32,
        flags: IrqFlags,
        handler: IrqHandler,
    ) -> Result<(), IrqError>;

    /// Removes the handler for `line`. When this returns, no invocation of the handler
    /// is in flight and none will start afterwards; callers rely on that to tear down
    /// the state the handler touches.
    fn unregister_handler(&self, line: u32);
}
