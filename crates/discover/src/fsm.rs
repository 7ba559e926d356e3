//! The discovery client's state machine, kept separate from any socket so
//! every transition is a pure function call: `Init → ConnectingDiscovery →
//! (CreatingSession | JoiningSession) → WaitingPeer → Negotiating →
//! (StartingHost | ConnectingHost) → Active → (Migrating | Ended | Failed)`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    ConnectingDiscovery,
    CreatingSession,
    JoiningSession,
    WaitingPeer,
    Negotiating,
    StartingHost,
    ConnectingHost,
    Active,
    Migrating,
    Ended,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    BeginConnect,
    DiscoveryConnected { has_session_string: bool },
    SessionReady,
    PeerThresholdReached,
    ElectedSelf,
    ElectedPeer,
    MediaFlowing,
    HostLost,
    RenegotiationStarted,
    Disconnect,
    Fatal,
}

/// One state machine per discovery attempt. `step` is the only way the
/// state changes, so a caller can drive it with fakes in a unit test and
/// with real sockets in `run`.
pub struct DiscoveryClientFsm {
    state: State,
}

impl DiscoveryClientFsm {
    pub fn new() -> Self {
        Self { state: State::Init }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Applies `event`, returning the resulting state or an error describing
    /// why the event doesn't apply from the current state. `Fatal` and
    /// `Disconnect` are accepted from any non-terminal state.
    pub fn step(&mut self, event: Event) -> Result<State, String> {
        let next = match (self.state, event) {
            (State::Init, Event::BeginConnect) => State::ConnectingDiscovery,

            (State::ConnectingDiscovery, Event::DiscoveryConnected { has_session_string: false }) => {
                State::CreatingSession
            }
            (State::ConnectingDiscovery, Event::DiscoveryConnected { has_session_string: true }) => {
                State::JoiningSession
            }

            (State::CreatingSession, Event::SessionReady) => State::WaitingPeer,
            (State::JoiningSession, Event::SessionReady) => State::WaitingPeer,

            (State::WaitingPeer, Event::PeerThresholdReached) => State::Negotiating,

            (State::Negotiating, Event::ElectedSelf) => State::StartingHost,
            (State::Negotiating, Event::ElectedPeer) => State::ConnectingHost,

            (State::StartingHost, Event::MediaFlowing) => State::Active,
            (State::ConnectingHost, Event::MediaFlowing) => State::Active,

            (State::Active, Event::HostLost) => State::Migrating,
            (State::Migrating, Event::RenegotiationStarted) => State::Negotiating,

            (_, Event::Disconnect) if !self.is_terminal() => State::Ended,
            (_, Event::Fatal) if !self.is_terminal() => State::Failed,

            (state, event) => {
                return Err(format!("{event:?} is not valid from {state:?}"));
            }
        };
        self.state = next;
        Ok(next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, State::Ended | State::Failed)
    }
}

impl Default for DiscoveryClientFsm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_create_and_host() {
        let mut fsm = DiscoveryClientFsm::new();
        assert_eq!(fsm.step(Event::BeginConnect).unwrap(), State::ConnectingDiscovery);
        assert_eq!(
            fsm.step(Event::DiscoveryConnected { has_session_string: false }).unwrap(),
            State::CreatingSession
        );
        assert_eq!(fsm.step(Event::SessionReady).unwrap(), State::WaitingPeer);
        assert_eq!(fsm.step(Event::PeerThresholdReached).unwrap(), State::Negotiating);
        assert_eq!(fsm.step(Event::ElectedSelf).unwrap(), State::StartingHost);
        assert_eq!(fsm.step(Event::MediaFlowing).unwrap(), State::Active);
        assert!(!fsm.is_terminal());
    }

    #[test]
    fn happy_path_join_and_connect() {
        let mut fsm = DiscoveryClientFsm::new();
        fsm.step(Event::BeginConnect).unwrap();
        assert_eq!(
            fsm.step(Event::DiscoveryConnected { has_session_string: true }).unwrap(),
            State::JoiningSession
        );
        fsm.step(Event::SessionReady).unwrap();
        fsm.step(Event::PeerThresholdReached).unwrap();
        assert_eq!(fsm.step(Event::ElectedPeer).unwrap(), State::ConnectingHost);
        assert_eq!(fsm.step(Event::MediaFlowing).unwrap(), State::Active);
    }

    #[test]
    fn host_loss_reenters_negotiation() {
        let mut fsm = DiscoveryClientFsm::new();
        fsm.step(Event::BeginConnect).unwrap();
        fsm.step(Event::DiscoveryConnected { has_session_string: true }).unwrap();
        fsm.step(Event::SessionReady).unwrap();
        fsm.step(Event::PeerThresholdReached).unwrap();
        fsm.step(Event::ElectedPeer).unwrap();
        fsm.step(Event::MediaFlowing).unwrap();
        assert_eq!(fsm.step(Event::HostLost).unwrap(), State::Migrating);
        assert_eq!(fsm.step(Event::RenegotiationStarted).unwrap(), State::Negotiating);
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let mut fsm = DiscoveryClientFsm::new();
        assert!(fsm.step(Event::PeerThresholdReached).is_err());
    }

    #[test]
    fn fatal_is_accepted_from_any_non_terminal_state() {
        let mut fsm = DiscoveryClientFsm::new();
        fsm.step(Event::BeginConnect).unwrap();
        assert_eq!(fsm.step(Event::Fatal).unwrap(), State::Failed);
        assert!(fsm.is_terminal());
        assert!(fsm.step(Event::Disconnect).is_err());
    }
}
