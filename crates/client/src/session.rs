use buildlink_proto::{CompileMessage, ExitCode, Failure};
use dashmap::DashMap;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

/// Everything a caller can observe about one outstanding request.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Message(CompileMessage),
    Progress(String),
    Failure(Failure),
    Finished(ExitCode),
    /// The connection died before the session could finish normally.
    Terminated,
}

/// Caller-side handle for one request. Events arrive on the connection's
/// read loop; the receiver outlives the table entry, so late observers
/// still see the terminal event.
pub struct Session {
    id: Uuid,
    events: UnboundedReceiver<SessionEvent>,
}

impl Session {
    pub(crate) fn new(id: Uuid, events: UnboundedReceiver<SessionEvent>) -> Self {
        Self { id, events }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next event, or `None` once the terminal event has been consumed and
    /// the sender dropped.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Drains the session until it finishes. Returns the exit code for a
    /// normal finish and `None` if the session was terminated.
    pub async fn wait_finished(mut self) -> Option<ExitCode> {
        while let Some(event) = self.events.recv().await {
            match event {
                SessionEvent::Finished(code) => return Some(code),
                SessionEvent::Terminated | SessionEvent::Failure(_) => return None,
                SessionEvent::Message(_) | SessionEvent::Progress(_) => {}
            }
        }
        None
    }
}

/// Maps session ids to the channel delivering that session's events.
///
/// Safe for concurrent use from the read loop and arbitrary caller
/// threads; ids are v4 uuids and are never reused.
#[derive(Default)]
pub struct SessionTable {
    sessions: DashMap<Uuid, UnboundedSender<SessionEvent>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the event sender for a freshly allocated session id.
    ///
    /// Panics if the id is already present: ids are generated per request,
    /// so a duplicate means a caller bug, not a runtime condition.
    pub fn register(&self, id: Uuid, sender: UnboundedSender<SessionEvent>) {
        let previous = self.sessions.insert(id, sender);
        assert!(previous.is_none(), "session id {id} registered twice");
    }

    /// Non-destructive lookup used for intermediate responses.
    pub fn resolve(&self, id: Uuid) -> Option<UnboundedSender<SessionEvent>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Atomically removes and returns the sender. A second call for the
    /// same id returns `None`.
    pub fn complete(&self, id: Uuid) -> Option<UnboundedSender<SessionEvent>> {
        self.sessions.remove(&id).map(|(_, sender)| sender)
    }

    /// Completes every outstanding session with a termination notification
    /// and leaves the table empty. Used on connection loss.
    pub fn terminate_all(&self) {
        let ids: Vec<Uuid> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some(sender) = self.complete(id) {
                let _ = sender.send(SessionEvent::Terminated);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn complete_is_idempotent() {
        let table = SessionTable::new();
        let id = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        table.register(id, tx);

        assert!(table.resolve(id).is_some());
        assert!(table.complete(id).is_some());
        assert!(table.complete(id).is_none());
        assert!(table.resolve(id).is_none());
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        let table = SessionTable::new();
        let id = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        table.register(id, tx);
        table.register(id, tx2);
    }

    #[tokio::test]
    async fn terminate_all_notifies_every_session() {
        let table = SessionTable::new();
        let mut receivers = Vec::new();
        for _ in 0..4 {
            let id = Uuid::new_v4();
            let (tx, rx) = mpsc::unbounded_channel();
            table.register(id, tx);
            receivers.push(rx);
        }

        table.terminate_all();
        assert!(table.is_empty());
        for mut rx in receivers {
            assert_eq!(rx.recv().await, Some(SessionEvent::Terminated));
        }
    }
}
