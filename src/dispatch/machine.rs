use super::OperationKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchState {
    #[default]
    Idle,
    Pending(OperationKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchEvent {
    Begin(OperationKind),
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchRejection {
    /// A begin arrived while another operation is pending.
    Busy { pending: OperationKind },
    /// A completion arrived with nothing pending.
    NothingPending,
}

/// Idle/Pending gate that keeps mutating operations single-flight.
#[derive(Debug, Default)]
pub struct DispatchMachine {
    state: DispatchState,
}

impl DispatchMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, DispatchState::Pending(_))
    }

    pub fn can_transition(&self, event: DispatchEvent) -> bool {
        self.next_state(event).is_ok()
    }

    pub fn next_state(&self, event: DispatchEvent) -> Result<DispatchState, DispatchRejection> {
        match (self.state, event) {
            (DispatchState::Idle, DispatchEvent::Begin(kind)) => Ok(DispatchState::Pending(kind)),
            (DispatchState::Pending(pending), DispatchEvent::Begin(_)) => {
                Err(DispatchRejection::Busy { pending })
            }
            (DispatchState::Pending(_), DispatchEvent::Complete) => Ok(DispatchState::Idle),
            (DispatchState::Idle, DispatchEvent::Complete) => {
                Err(DispatchRejection::NothingPending)
            }
        }
    }

    pub fn transition(&mut self, event: DispatchEvent) -> Result<DispatchState, DispatchRejection> {
        tracing::debug!(from = ?self.state, event = ?event, "request dispatch transition");
        let next = self.next_state(event).inspect_err(|rejection| {
            tracing::warn!(
                from = ?self.state,
                event = ?event,
                ?rejection,
                "dispatch transition rejected"
            );
        })?;
        self.state = next;
        Ok(next)
    }

    /// Drops whatever was pending. Used when the session is replaced.
    pub fn reset(&mut self) {
        self.state = DispatchState::Idle;
    }
}

impl std::fmt::Display for DispatchMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.state {
            DispatchState::Idle => write!(f, "Idle"),
            DispatchState::Pending(kind) => write!(f, "Pending({kind})"),
        }
    }
}
