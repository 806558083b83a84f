use super::state::SessionState;
use std::sync::{Arc, Mutex, PoisonError};

/// Calls that may only have one request outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    Start,
    Chat,
    Questionnaire,
    RomSave,
}

fn flag(st: &mut SessionState, kind: CallKind) -> &mut bool {
    match kind {
        CallKind::Start => &mut st.start_in_flight,
        CallKind::Chat => &mut st.chat_in_flight,
        CallKind::Questionnaire => &mut st.questionnaire_in_flight,
        CallKind::RomSave => &mut st.rom_save_in_flight,
    }
}

/// Ticket for an in-flight call. Clears its flag on drop unless the session was reset
/// meanwhile (the new generation owns the flags then).
///
/// Must not be dropped while the session lock is held by the same task.
pub(crate) struct InFlight {
    state: Arc<Mutex<SessionState>>,
    kind: CallKind,
    generation: u64,
}

impl InFlight {
    /// Test-and-set on an already locked state. `None` when a call of this kind is pending.
    pub(crate) fn claim(st: &mut SessionState, shared: &Arc<Mutex<SessionState>>, kind: CallKind) -> Option<Self> {
        let generation = st.generation;
        let busy = flag(st, kind);
        if *busy {
            return None;
        }
        *busy = true;
        Some(Self {
            state: Arc::clone(shared),
            kind,
            generation,
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if st.generation == self.generation {
            *flag(&mut st, self.kind) = false;
        }
    }
}
