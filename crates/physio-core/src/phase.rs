//! Assessment phases and the transition table between them.

use serde::{Deserialize, Serialize};

/// Stage of the guided assessment. Only moves forward, except for a reset to `Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Idle,
    Chat,
    CaptureVideo,
    Questionnaire,
    /// Questionnaire marked complete; answers still accepted without a scripted question.
    QuestionnaireFreeform,
    CaptureRom,
    Dashboard,
}

impl Phase {
    /// Forward edges. `reset()` is the only way back.
    pub fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Idle, Chat)
                | (Chat, CaptureVideo)
                | (Chat, Questionnaire)
                | (CaptureVideo, Questionnaire)
                | (Questionnaire, QuestionnaireFreeform)
                | (Questionnaire, CaptureRom)
                | (Questionnaire, Dashboard)
                | (CaptureRom, Dashboard)
        )
    }

    /// Phases in which a finished transcript is routed somewhere.
    pub fn consumes_voice(self) -> bool {
        matches!(self, Phase::Chat | Phase::Questionnaire | Phase::QuestionnaireFreeform)
    }

    pub fn is_questionnaire(self) -> bool {
        matches!(self, Phase::Questionnaire | Phase::QuestionnaireFreeform)
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Chat => "chat",
            Phase::CaptureVideo => "capture-video",
            Phase::Questionnaire => "questionnaire",
            Phase::QuestionnaireFreeform => "questionnaire-freeform",
            Phase::CaptureRom => "capture-rom",
            Phase::Dashboard => "dashboard",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::Phase::*;
    use super::*;

    const ALL: [Phase; 7] = [Idle, Chat, CaptureVideo, Questionnaire, QuestionnaireFreeform, CaptureRom, Dashboard];

    #[test]
    fn happy_path_is_allowed() {
        let path = [Idle, Chat, CaptureVideo, Questionnaire, CaptureRom, Dashboard];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
        assert!(Questionnaire.can_advance_to(Dashboard));
        assert!(Chat.can_advance_to(Questionnaire));
    }

    #[test]
    fn no_backward_or_self_edges() {
        for from in ALL {
            assert!(!from.can_advance_to(from));
            assert!(!from.can_advance_to(Idle));
        }
        assert!(!Dashboard.can_advance_to(CaptureRom));
        assert!(!QuestionnaireFreeform.can_advance_to(CaptureRom));
        assert!(!QuestionnaireFreeform.can_advance_to(Dashboard));
        assert!(!CaptureRom.can_advance_to(Questionnaire));
    }

    #[test]
    fn voice_consuming_phases() {
        let consuming: Vec<_> = ALL.into_iter().filter(|p| p.consumes_voice()).collect();
        assert_eq!(consuming, vec![Chat, Questionnaire, QuestionnaireFreeform]);
    }
}
