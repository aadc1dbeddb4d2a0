//! # Error Types for the IOC Runtime
//!
//! Every fallible operation in the runtime returns [`IocError`], a single
//! enumerated error type covering the full surface: argument validation,
//! identity lookups, capacity limits, subscriber conflicts, missing peers,
//! runtime faults, and capability gaps.
//!
//! ## Propagation Policy
//!
//! The runtime never swallows errors. The only conditions recovered locally
//! are transient accept failures inside the auto-accept daemons (logged and
//! retried) and full subscriber queues during posting (surfaced as
//! [`IocError::TooManyQueued`] so the caller picks the policy: retry after a
//! drain, or accept the loss). Everything else bubbles to the caller of the
//! facade API verbatim.
//!
//! ## The `Bug` Variant
//!
//! [`IocError::Bug`] is the sentinel for internal invariant violations. It is
//! never produced by bad user input; seeing it means the runtime itself is in
//! a state it promised to never reach. Debug builds assert before returning it.

use thiserror::Error;

/// Convenience alias used by every fallible API in this crate.
pub type Result<T> = std::result::Result<T, IocError>;

/// The unified error type of the IOC runtime.
///
/// Variants are grouped the way callers typically handle them: input errors
/// mean the call itself was malformed, identity errors mean a stale or bogus
/// id, capacity errors mean a fixed table or queue is full, conflict errors
/// mean a duplicate registration, missing-peer errors mean nobody is on the
/// other end, and runtime errors mean the operation itself went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IocError {
    // --- input ---
    /// An argument failed validation (null-equivalent, empty, or malformed).
    #[error("invalid parameter")]
    InvalidParam,
    /// The link's usage role does not permit the requested operation.
    #[error("usage role incompatible with operation")]
    IncompatibleUsage,
    /// A data descriptor carried no payload at all.
    #[error("data descriptor carries zero payload bytes")]
    ZeroData,

    // --- identity ---
    /// No live service with the given id.
    #[error("service does not exist")]
    NotExistService,
    /// No live link with the given id.
    #[error("link does not exist")]
    NotExistLink,
    /// An auto-link id outside the reserved value was supplied.
    #[error("invalid auto-link id")]
    InvalidAutoLinkId,

    // --- capacity ---
    /// The service table is full.
    #[error("too many services")]
    TooManyServices,
    /// The link table is full.
    #[error("too many links")]
    TooManyLinks,
    /// A service's accepted-client tracking array is full.
    #[error("too many accepted clients")]
    TooManyClients,
    /// The event-consumer table (global or per-link) is full.
    #[error("too many event consumers")]
    TooManyEventConsumers,
    /// A bounded event queue is at capacity; the post was not delivered.
    #[error("too many queued event descriptors")]
    TooManyQueued,
    /// A caller-supplied buffer cannot hold the result.
    #[error("buffer too small")]
    BufferTooSmall,
    /// A bounded transport buffer is at capacity.
    #[error("transport buffer full")]
    BufferFull,
    /// A payload exceeds the transport's maximum message size.
    #[error("data payload too large")]
    DataTooLarge,

    // --- conflict ---
    /// The same consumer identity is already subscribed.
    #[error("event consumer already registered")]
    ConflictEventConsumer,
    /// A service with the same URI is already online.
    #[error("conflicting service arguments")]
    ConflictServiceArgs,

    // --- missing peer ---
    /// No subscriber matched the posted event.
    #[error("no event consumer")]
    NoEventConsumer,
    /// The peer exposes no command executor.
    #[error("no command executor")]
    NoCmdExecutor,
    /// No data descriptor is pending on the receive path.
    #[error("no data pending")]
    NoData,
    /// No event descriptor is pending.
    #[error("no event pending")]
    NoEventPending,
    /// No command descriptor is pending on the polling path.
    #[error("no command pending")]
    NoCmdPending,

    // --- runtime ---
    /// A bounded wait expired before the operation completed.
    #[error("operation timed out")]
    Timeout,
    /// The link is busy with a conflicting operation of the same role.
    #[error("link busy")]
    Busy,
    /// The peer end of the link is gone.
    #[error("link broken")]
    LinkBroken,
    /// The executor ran but reported failure.
    #[error("command execution failed")]
    CmdExecFailed,
    /// The acknowledgement could not be matched to an in-flight command.
    #[error("command acknowledgement failed")]
    AckCmdFailed,

    // --- capability ---
    /// The protocol backend does not support this message kind.
    #[error("operation not supported by protocol backend")]
    NotSupport,
    /// The operation is specified but not implemented by this build.
    #[error("not implemented")]
    NotImplemented,
    /// The service was not brought online with the broadcast flag.
    #[error("service does not support broadcast events")]
    NotSupportBroadcastEvent,
    /// The service accepts clients through its daemon only.
    #[error("service does not support manual accept")]
    NotSupportManualAccept,

    // --- resources ---
    /// An allocation or thread spawn failed.
    #[error("out of memory")]
    OutOfMemory,

    /// Internal invariant violation. Abort-worthy on debug builds.
    #[error("internal invariant violated: {0}")]
    Bug(&'static str),
}

impl IocError {
    /// Raise an internal invariant violation.
    ///
    /// Debug builds panic immediately so the broken invariant is caught at
    /// its source; release builds surface the sentinel to the caller.
    pub(crate) fn bug(msg: &'static str) -> Self {
        debug_assert!(false, "BUG: {msg}");
        IocError::Bug(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that error kinds render a human-readable message.
    #[test]
    fn test_error_display() {
        assert_eq!(
            IocError::TooManyQueued.to_string(),
            "too many queued event descriptors"
        );
        assert_eq!(IocError::ZeroData.to_string(), "data descriptor carries zero payload bytes");
    }

    /// Test that errors compare by kind.
    #[test]
    fn test_error_equality() {
        assert_eq!(IocError::Timeout, IocError::Timeout);
        assert_ne!(IocError::Timeout, IocError::Busy);
    }
}
