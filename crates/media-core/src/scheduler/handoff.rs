//! Ordering between a session leaving one worker and joining another
//!
//! Every detach carries a [`Release`]; the next insertion of the same session
//! waits on the matching [`Handoff`] and is not admitted by its new worker
//! until the old worker has applied (or dropped) the detach.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub(crate) struct Handoff {
    released: AtomicBool,
    /// Hand-off the detached insertion was itself still waiting on
    after: Option<Arc<Handoff>>,
}

impl Handoff {
    pub fn new(after: Option<Arc<Handoff>>) -> Arc<Self> {
        Arc::new(Self {
            released: AtomicBool::new(false),
            after: after.filter(|previous| !previous.is_complete()),
        })
    }

    /// True once this detach and every earlier one have been applied.
    pub fn is_complete(&self) -> bool {
        self.released.load(Ordering::Acquire) && self.after.as_ref().map_or(true, |after| after.is_complete())
    }
}

/// Completes its hand-off when dropped.
///
/// Travels inside the detach event, so the hand-off completes either after
/// the worker applied it or when the queue holding it is torn down.
#[derive(Debug)]
pub(crate) struct Release(Arc<Handoff>);

impl Release {
    pub fn new(handoff: Arc<Handoff>) -> Self {
        Self(handoff)
    }
}

impl Drop for Release {
    fn drop(&mut self) {
        self.0.released.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_completes_on_drop() {
        let handoff = Handoff::new(None);
        let release = Release::new(handoff.clone());
        assert!(!handoff.is_complete());
        drop(release);
        assert!(handoff.is_complete());
    }

    #[test]
    fn test_waits_for_earlier_detach() {
        let first = Handoff::new(None);
        let first_release = Release::new(first.clone());
        let second = Handoff::new(Some(first.clone()));
        drop(Release::new(second.clone()));

        assert!(!second.is_complete());
        drop(first_release);
        assert!(second.is_complete());
    }

    #[test]
    fn test_completed_predecessor_is_not_kept() {
        let first = Handoff::new(None);
        drop(Release::new(first.clone()));
        let second = Handoff::new(Some(first));
        assert!(second.after.is_none());
    }
}
