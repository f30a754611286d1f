//! Duplicate suppression for capture detections.

use stageproto::DetectionEvent;

use crate::options::DuplicatePolicy;

/// Remembers the last forwarded detection and drops repeats under
/// `DuplicatePolicy::Suppress`.
#[derive(Debug, Default)]
pub struct DetectionFilter {
    policy: DuplicatePolicy,
    last: Option<DetectionEvent>,
}

impl DetectionFilter {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self { policy, last: None }
    }

    /// Returns the event if it should reach the callback.
    pub fn admit(&mut self, event: DetectionEvent) -> Option<DetectionEvent> {
        if self.policy == DuplicatePolicy::Suppress
            && self.last.as_ref().is_some_and(|last| last.same_detection(&event))
        {
            return None;
        }
        self.last = Some(event.clone());
        Some(event)
    }

    pub fn last(&self) -> Option<&DetectionEvent> {
        self.last.as_ref()
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
