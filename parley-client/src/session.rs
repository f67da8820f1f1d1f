use std::path::PathBuf;

/// Where a session is in its lifecycle.
///
/// `Unconnected -> Connecting -> AwaitingName -> Connected`, and back to
/// `Unconnected` whenever the socket closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unconnected,
    Connecting,
    AwaitingName,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEntry {
    pub file_name: String,
    pub media_type: &'static str,
    pub size_bytes: usize,
    pub saved_to: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryBody {
    Public(String),
    Private(String),
    System(String),
    Media(MediaEntry),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub body: EntryBody,
    /// Client clock at the time the frame was applied.
    pub received_at_ms: u64,
}

/// Per-session chat state. Owned and mutated only by the controller.
#[derive(Debug)]
pub struct SessionState {
    phase: Phase,
    loading: bool,
    name: String,
    members: Vec<String>,
    feed: Vec<FeedEntry>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Unconnected,
            loading: false,
            name: String::new(),
            members: Vec::new(),
            feed: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    pub fn awaiting_name(&self) -> bool {
        self.phase == Phase::AwaitingName
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn feed(&self) -> &[FeedEntry] {
        &self.feed
    }

    pub(crate) fn begin_connect(&mut self) {
        self.phase = Phase::Connecting;
        self.loading = false;
    }

    pub(crate) fn on_open(&mut self) {
        self.phase = Phase::AwaitingName;
    }

    pub(crate) fn on_name_submitted(&mut self, name: &str) {
        self.name = name.to_owned();
        self.phase = Phase::Connected;
    }

    pub(crate) fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    /// Socket gone: nothing from the session survives except the loading flag,
    /// which the controller clears on its own timer.
    pub(crate) fn on_close(&mut self) {
        self.phase = Phase::Unconnected;
        self.name.clear();
        self.members.clear();
        self.feed.clear();
    }

    pub(crate) fn replace_members(&mut self, members: Vec<String>) {
        self.members = members;
    }

    pub(crate) fn append(&mut self, body: EntryBody, received_at_ms: u64) -> &FeedEntry {
        self.feed.push(FeedEntry {
            body,
            received_at_ms,
        });
        &self.feed[self.feed.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_walks_through_every_phase() {
        let mut state = SessionState::new();
        assert_eq!(state.phase(), Phase::Unconnected);

        state.begin_connect();
        assert_eq!(state.phase(), Phase::Connecting);

        state.on_open();
        assert!(state.awaiting_name());
        assert!(!state.is_connected());

        state.on_name_submitted("alice");
        assert!(state.is_connected());
        assert_eq!(state.name(), "alice");

        state.on_close();
        assert_eq!(state.phase(), Phase::Unconnected);
        assert_eq!(state.name(), "");
    }

    #[test]
    fn close_empties_members_and_feed() {
        let mut state = SessionState::new();
        state.begin_connect();
        state.on_open();
        state.on_name_submitted("alice");
        state.replace_members(vec!["alice".to_owned(), "bob".to_owned()]);
        state.append(EntryBody::Public("hi".to_owned()), 1);
        state.append(EntryBody::System("bob joined".to_owned()), 2);

        state.on_close();
        assert!(state.members().is_empty());
        assert!(state.feed().is_empty());
    }

    #[test]
    fn close_leaves_loading_for_the_timer() {
        let mut state = SessionState::new();
        state.set_loading(true);
        state.on_close();
        assert!(state.is_loading());

        state.begin_connect();
        assert!(!state.is_loading());
    }

    #[test]
    fn members_are_replaced_not_merged() {
        let mut state = SessionState::new();
        state.replace_members(vec!["alice".to_owned(), "bob".to_owned()]);
        state.replace_members(vec!["carol".to_owned()]);
        assert_eq!(state.members(), ["carol".to_owned()]);
    }

    #[test]
    fn feed_keeps_arrival_order() {
        let mut state = SessionState::new();
        let first = state.append(EntryBody::Public("one".to_owned()), 10).clone();
        state.append(EntryBody::Private("two".to_owned()), 20);
        assert_eq!(state.feed()[0], first);
        assert_eq!(state.feed()[1].received_at_ms, 20);
    }
}
