//! Lifecycle state machines
//!
//! Two small machines: the acquisition scheduler (Idle/Polling) and one
//! machine per HTTP connection. Both only track state and report
//! transitions; the tasks driving them do the I/O.

use log::{debug, warn};

/// State transition result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransition<S> {
    /// Stay in the current state
    Stay,
    /// Move to a new state
    Transition(S),
}

/// Acquisition scheduler states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    /// Waiting for the next tick
    Idle,
    /// Running one read cycle
    Polling,
}

/// Acquisition scheduler events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionEvent {
    /// Poll period elapsed
    Tick,
    /// Read cycle finished, successfully or not
    CycleFinished,
}

/// Idle/Polling machine of the acquisition task
#[derive(Debug)]
pub struct AcquisitionMachine {
    current_state: AcquisitionState,
}

impl AcquisitionMachine {
    pub fn new() -> Self {
        Self {
            current_state: AcquisitionState::Idle,
        }
    }

    pub fn current_state(&self) -> AcquisitionState {
        self.current_state
    }

    pub fn handle_event(&mut self, event: AcquisitionEvent) -> StateTransition<AcquisitionState> {
        let transition = match (self.current_state, event) {
            (AcquisitionState::Idle, AcquisitionEvent::Tick) => {
                StateTransition::Transition(AcquisitionState::Polling)
            }
            (AcquisitionState::Polling, AcquisitionEvent::CycleFinished) => {
                StateTransition::Transition(AcquisitionState::Idle)
            }
            // a tick while polling is absorbed by the running cycle
            _ => StateTransition::Stay,
        };

        if let StateTransition::Transition(next) = transition {
            self.current_state = next;
        }
        transition
    }
}

impl Default for AcquisitionMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-connection states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accumulating bytes until the request line is complete
    AwaitingRequest,
    /// Request line available for parsing
    RequestReceived,
    /// Header and body being written
    WritingResponse,
    /// Connection finished; no more I/O
    Closed,
}

/// Per-connection events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A full request line is buffered
    RequestLineComplete,
    /// Request line parsed into method and target
    RequestAccepted,
    /// Request line is malformed or too long
    RequestRejected,
    /// Peer closed before sending a request line
    PeerClosed,
    /// Response fully written and flushed
    ResponseFlushed,
    /// Socket I/O or rendering failed
    Aborted,
}

/// Lifecycle of one HTTP connection
#[derive(Debug)]
pub struct ConnectionMachine {
    current_state: ConnectionState,
    previous_state: Option<ConnectionState>,
}

impl ConnectionMachine {
    pub fn new() -> Self {
        Self {
            current_state: ConnectionState::AwaitingRequest,
            previous_state: None,
        }
    }

    pub fn current_state(&self) -> ConnectionState {
        self.current_state
    }

    pub fn previous_state(&self) -> Option<ConnectionState> {
        self.previous_state
    }

    pub fn is_closed(&self) -> bool {
        self.current_state == ConnectionState::Closed
    }

    pub fn handle_event(&mut self, event: ConnectionEvent) -> StateTransition<ConnectionState> {
        let transition = Self::get_state_transition(self.current_state, event);

        match transition {
            StateTransition::Transition(new_state) => {
                debug!("[HTTP] {:?} -> {:?} on {:?}", self.current_state, new_state, event);
                self.previous_state = Some(self.current_state);
                self.current_state = new_state;
            }
            StateTransition::Stay => {
                if self.current_state != ConnectionState::Closed {
                    warn!("[HTTP] Ignoring {:?} in {:?}", event, self.current_state);
                }
            }
        }

        transition
    }

    fn get_state_transition(
        current_state: ConnectionState,
        event: ConnectionEvent,
    ) -> StateTransition<ConnectionState> {
        match (current_state, event) {
            (ConnectionState::AwaitingRequest, ConnectionEvent::RequestLineComplete) => {
                StateTransition::Transition(ConnectionState::RequestReceived)
            }
            (ConnectionState::RequestReceived, ConnectionEvent::RequestAccepted) => {
                StateTransition::Transition(ConnectionState::WritingResponse)
            }
            (ConnectionState::WritingResponse, ConnectionEvent::ResponseFlushed) => {
                StateTransition::Transition(ConnectionState::Closed)
            }

            // Every failure path ends the connection without a response
            (
                ConnectionState::AwaitingRequest | ConnectionState::RequestReceived,
                ConnectionEvent::RequestRejected,
            )
            | (ConnectionState::AwaitingRequest, ConnectionEvent::PeerClosed)
            | (
                ConnectionState::AwaitingRequest
                | ConnectionState::RequestReceived
                | ConnectionState::WritingResponse,
                ConnectionEvent::Aborted,
            ) => StateTransition::Transition(ConnectionState::Closed),

            _ => StateTransition::Stay,
        }
    }
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}
