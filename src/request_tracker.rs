use dashmap::DashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Sessions with a completion request in flight.
///
/// Focus changes never touch this set; the UI's loading indicator is just
/// `is_processing(active_session_id)`.
#[derive(Debug, Clone, Default)]
pub struct RequestTracker {
    in_flight: Arc<DashSet<Uuid>>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a request as outstanding. Returns `false` if one already was.
    pub fn begin_request(&self, session_id: Uuid) -> bool {
        self.in_flight.insert(session_id)
    }

    pub fn end_request(&self, session_id: Uuid) {
        self.in_flight.remove(&session_id);
    }

    pub fn is_processing(&self, session_id: Uuid) -> bool {
        self.in_flight.contains(&session_id)
    }

    /// Claims the session's request slot, or `None` if it is taken.
    /// The slot is released when the guard drops, whatever the outcome.
    pub fn try_begin(&self, session_id: Uuid) -> Option<RequestGuard> {
        if self.begin_request(session_id) {
            Some(RequestGuard {
                tracker: self.clone(),
                session_id,
            })
        } else {
            None
        }
    }

    pub fn in_flight(&self) -> Vec<Uuid> {
        self.in_flight.iter().map(|id| *id).collect()
    }
}

#[derive(Debug)]
pub struct RequestGuard {
    tracker: RequestTracker,
    session_id: Uuid,
}

impl RequestGuard {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        log::debug!("Request for session {} finished", self.session_id);
        self.tracker.end_request(self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_is_idempotent_and_end_is_unconditional() {
        let tracker = RequestTracker::new();
        let id = Uuid::new_v4();

        assert!(tracker.begin_request(id));
        assert!(!tracker.begin_request(id));
        assert_eq!(tracker.in_flight(), vec![id]);

        tracker.end_request(id);
        tracker.end_request(id);
        assert!(!tracker.is_processing(id));
    }

    #[test]
    fn second_claim_on_a_session_is_refused() {
        let tracker = RequestTracker::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let guard = tracker.try_begin(a).unwrap();
        assert!(tracker.try_begin(a).is_none());
        let other = tracker.try_begin(b).unwrap();
        assert!(tracker.is_processing(a) && tracker.is_processing(b));

        drop(guard);
        assert!(!tracker.is_processing(a));
        assert!(tracker.is_processing(other.session_id()));
    }

    #[tokio::test]
    async fn guard_releases_when_the_task_panics() {
        let tracker = RequestTracker::new();
        let id = Uuid::new_v4();
        let guard = tracker.try_begin(id).unwrap();

        let task = tokio::spawn(async move {
            let _guard = guard;
            panic!("completion blew up");
        });
        assert!(task.await.is_err());
        assert!(!tracker.is_processing(id));
    }
}
