use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Why a [`QueryContext`] is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    Canceled,
    DeadlineExceeded,
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextError::Canceled => write!(f, "context canceled"),
            ContextError::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

/// How often [`QueryContext::wait`] looks at the parents, which do not wake
/// their children.
const PARENT_POLL_INTERVAL: Duration = Duration::from_millis(10);

struct Inner {
    parents: Vec<QueryContext>,
    state: Mutex<Option<ContextError>>,
    canceled: Condvar,
    deadline: Option<Instant>,
    origin: Vec<(String, String)>,
}

/// Hierarchical cancellation token. A context is done when it was canceled,
/// its deadline passed, or any of its parents is done.
#[derive(Clone)]
pub struct QueryContext {
    inner: Arc<Inner>,
}

impl QueryContext {
    /// A root context that is never done unless canceled.
    pub fn background() -> Self {
        Self::child(vec![], None, vec![])
    }

    fn child(
        parents: Vec<QueryContext>,
        deadline: Option<Instant>,
        origin: Vec<(String, String)>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                parents,
                state: Mutex::new(None),
                canceled: Condvar::new(),
                deadline,
                origin,
            }),
        }
    }

    pub fn with_cancel(&self) -> Self {
        Self::child(vec![self.clone()], None, self.inner.origin.clone())
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now().checked_add(timeout);
        Self::child(vec![self.clone()], deadline, self.inner.origin.clone())
    }

    /// A child that is done as soon as either `self` or `other` is.
    pub fn link(&self, other: &QueryContext) -> Self {
        Self::child(
            vec![self.clone(), other.clone()],
            None,
            self.inner.origin.clone(),
        )
    }

    /// A child carrying an extra key/value pair describing where the query
    /// came from.
    pub fn with_origin<K: Into<String>, V: Into<String>>(&self, key: K, value: V) -> Self {
        let mut origin = self.inner.origin.clone();
        origin.push((key.into(), value.into()));
        Self::child(vec![self.clone()], None, origin)
    }

    pub fn origin(&self) -> &[(String, String)] {
        &self.inner.origin
    }

    pub fn deadline(&self) -> Option<Instant> {
        let parent_deadline = self
            .inner
            .parents
            .iter()
            .filter_map(|p| p.deadline())
            .min();
        match (self.inner.deadline, parent_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Cancels the context and every context derived from it. Idempotent.
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if state.is_none() {
            *state = Some(ContextError::Canceled);
        }
        self.inner.canceled.notify_all();
    }

    pub fn err(&self) -> Option<ContextError> {
        if let Some(err) = *self.inner.state.lock().unwrap() {
            return Some(err);
        }
        self.inherited_err()
    }

    /// The deadline of this context or the termination of a parent.
    fn inherited_err(&self) -> Option<ContextError> {
        if let Some(deadline) = self.inner.deadline {
            if Instant::now() >= deadline {
                return Some(ContextError::DeadlineExceeded);
            }
        }
        self.inner.parents.iter().find_map(|p| p.err())
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Blocks for up to `timeout`, returning early with the termination
    /// reason if the context ends first.
    pub fn wait(&self, timeout: Duration) -> Option<ContextError> {
        let until = Instant::now() + timeout;
        let mut state = self.inner.state.lock().unwrap();
        loop {
            if let Some(err) = *state {
                return Some(err);
            }
            if let Some(err) = self.inherited_err() {
                return Some(err);
            }
            let now = Instant::now();
            if now >= until {
                return None;
            }
            let mut slice = (until - now).min(PARENT_POLL_INTERVAL);
            if let Some(deadline) = self.deadline() {
                slice = slice.min(deadline.saturating_duration_since(now));
            }
            state = self.inner.canceled.wait_timeout(state, slice).unwrap().0;
        }
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryContext")
            .field("err", &self.err())
            .field("origin", &self.inner.origin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_propagates_to_children() {
        let root = QueryContext::background();
        let child = root.with_cancel();
        let grandchild = child.with_origin("user", "alice");
        assert!(!grandchild.is_done());
        root.cancel();
        assert_eq!(grandchild.err(), Some(ContextError::Canceled));
    }

    #[test]
    fn cancel_does_not_reach_parents() {
        let root = QueryContext::background();
        let child = root.with_cancel();
        child.cancel();
        child.cancel();
        assert!(child.is_done());
        assert!(!root.is_done());
    }

    #[test]
    fn deadline_is_reported_distinctly() {
        let ctx = QueryContext::background().with_timeout(Duration::from_millis(1));
        assert_eq!(
            ctx.wait(Duration::from_secs(5)),
            Some(ContextError::DeadlineExceeded)
        );
        assert!(ctx.deadline().is_some());
    }

    #[test]
    fn wait_wakes_on_cancel() {
        let ctx = QueryContext::background().with_cancel();
        let parent = QueryContext::background();
        let child = parent.with_origin("user", "alice");

        let started = Instant::now();
        let handle = {
            let (ctx, parent) = (ctx.clone(), parent.clone());
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                ctx.cancel();
                parent.cancel();
            })
        };
        assert_eq!(ctx.wait(Duration::from_secs(30)), Some(ContextError::Canceled));
        assert_eq!(child.wait(Duration::from_secs(30)), Some(ContextError::Canceled));
        assert!(started.elapsed() < Duration::from_secs(10));
        handle.join().unwrap();
    }

    #[test]
    fn wait_times_out_when_nothing_happens() {
        let ctx = QueryContext::background().with_cancel();
        assert_eq!(ctx.wait(Duration::from_millis(5)), None);
        assert!(!ctx.is_done());
    }

    #[test]
    fn linked_context_observes_both_parents() {
        let a = QueryContext::background();
        let b = QueryContext::background();
        let linked = a.link(&b);
        b.cancel();
        assert_eq!(linked.err(), Some(ContextError::Canceled));
        assert!(!a.is_done());
    }

    #[test]
    fn origin_accumulates() {
        let ctx = QueryContext::background()
            .with_origin("user", "alice")
            .with_origin("source", "api");
        assert_eq!(
            ctx.with_cancel().origin(),
            &[
                ("user".to_string(), "alice".to_string()),
                ("source".to_string(), "api".to_string())
            ]
        );
    }
}
