//! # Call Contexts
//!
//! Everything the dispatcher needs to route one completion back to its call:
//!
//! - [`CallTag`]: opaque identity attached to an operation at issue time
//! - [`CallContext`]: the per-call record (options, result slot, action)
//! - [`CompletionAction`]: what happens exactly once when the call finishes
//! - [`CallTable`]: registered contexts keyed by tag
//! - [`CallFuture`]: the future handed out by fire-and-await calls
//! - [`CallOutcome`]: status plus response, as seen by the caller

mod context;
mod future;
mod outcome;
mod table;

pub use context::{CallContext, CompletionAction, ResultSlot};
pub use future::CallFuture;
pub use outcome::CallOutcome;
pub use table::CallTable;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Opaque identifier of one in-flight call.
///
/// Tags are issued by a [`CallTable`] from a monotonic counter, so a tag is
/// never reused while the client lives. [`CallTag::POLL_SENTINEL`] is reserved
/// for poll-once calls and is never registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallTag(u64);

impl CallTag {
    pub const POLL_SENTINEL: CallTag = CallTag(0);

    pub const fn from_raw(raw: u64) -> Self {
        CallTag(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub fn is_sentinel(self) -> bool {
        self == Self::POLL_SENTINEL
    }
}

impl fmt::Display for CallTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-call deadline and metadata, set before the call is issued.
///
/// The transport enforces the deadline; the dispatcher never looks at it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub deadline: Option<Duration>,
    pub metadata: BTreeMap<String, String>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel() {
        assert!(CallTag::POLL_SENTINEL.is_sentinel());
        assert!(!CallTag::from_raw(1).is_sentinel());
        assert_eq!(CallTag::from_raw(5).to_string(), "#5");
    }

    #[test]
    fn test_options_builder() {
        let options = CallOptions::new()
            .with_deadline(Duration::from_millis(250))
            .with_metadata("operator", "cli");

        assert_eq!(options.deadline, Some(Duration::from_millis(250)));
        assert_eq!(options.metadata.get("operator").map(String::as_str), Some("cli"));
    }
}
