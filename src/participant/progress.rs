use super::ParticipantProgress;
use crate::config::StudyConfig;

/// Completion criteria for a participant's session.
#[derive(Debug, Clone)]
pub struct CompletionRule {
    pub total_required: u32,
    pub spontaneous_required: u32,
    pub spontaneous_prefix: String,
}

impl From<&StudyConfig> for CompletionRule {
    fn from(study: &StudyConfig) -> Self {
        Self {
            total_required: study.total_required,
            spontaneous_required: study.spontaneous_required,
            spontaneous_prefix: study.spontaneous_prefix.clone(),
        }
    }
}

impl Default for CompletionRule {
    fn default() -> Self {
        Self::from(&StudyConfig::default())
    }
}

impl CompletionRule {
    /// Progress for a set of recorded prompt ids (one entry per recording).
    pub fn evaluate<'a, I>(&self, prompt_ids: I) -> ParticipantProgress
    where
        I: IntoIterator<Item = &'a str>,
    {
        let (mut total, mut spontaneous) = (0u32, 0u32);
        for prompt_id in prompt_ids {
            total += 1;
            if prompt_id.starts_with(&self.spontaneous_prefix) {
                spontaneous += 1;
            }
        }
        let scripted = total - spontaneous;
        let scripted_required = self
            .total_required
            .saturating_sub(self.spontaneous_required);

        ParticipantProgress {
            total_recordings: total,
            total_required: self.total_required,
            is_complete: total >= self.total_required
                && spontaneous >= self.spontaneous_required
                && scripted >= scripted_required,
        }
    }
}

/// Combines locally computed progress with what the server reports.
///
/// Server values are adopted only when they report more recordings or a
/// completion the local state lacks; a locally higher count is never lowered.
pub fn merge_progress(
    local: ParticipantProgress,
    server: Option<&ParticipantProgress>,
) -> ParticipantProgress {
    let Some(server) = server else {
        return local;
    };

    let server_ahead = server.total_recordings > local.total_recordings;
    let server_completed = server.is_complete && !local.is_complete;
    if !server_ahead && !server_completed {
        return local;
    }

    ParticipantProgress {
        total_recordings: local.total_recordings.max(server.total_recordings),
        total_required: local.total_required,
        is_complete: local.is_complete || server.is_complete,
    }
}

/// Where a participant should resume within the prompt catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptPosition {
    pub index: usize,
    pub session_complete: bool,
}

/// First catalog prompt without a recording; the last prompt once all are done.
pub fn next_prompt_position<S, F>(catalog: &[S], is_recorded: F) -> PromptPosition
where
    S: AsRef<str>,
    F: Fn(&str) -> bool,
{
    match catalog.iter().position(|id| !is_recorded(id.as_ref())) {
        Some(index) => PromptPosition {
            index,
            session_complete: false,
        },
        None => PromptPosition {
            index: catalog.len().saturating_sub(1),
            session_complete: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn small_rule() -> CompletionRule {
        CompletionRule {
            total_required: 4,
            spontaneous_required: 1,
            spontaneous_prefix: "Spontaneous_".to_string(),
        }
    }

    #[test]
    fn test_evaluate_counts_recordings() {
        let progress = small_rule().evaluate(["A_1", "A_2"]);
        assert_eq!(progress, ParticipantProgress::new(2, 4, false));
    }

    #[test]
    fn test_evaluate_requires_spontaneous_share() {
        let rule = small_rule();
        let scripted_only = rule.evaluate(["A_1", "A_2", "A_3", "A_4"]);
        assert_eq!(scripted_only.total_recordings, 4);
        assert!(!scripted_only.is_complete);

        let mixed = rule.evaluate(["A_1", "A_2", "A_3", "Spontaneous_1"]);
        assert!(mixed.is_complete);
    }

    #[test]
    fn test_merge_without_server_keeps_local() {
        let local = ParticipantProgress::new(3, 163, false);
        assert_eq!(merge_progress(local, None), local);
    }

    #[test]
    fn test_merge_adopts_higher_server_count() {
        let local = ParticipantProgress::new(3, 163, false);
        let server = ParticipantProgress::new(10, 163, false);
        assert_eq!(merge_progress(local, Some(&server)).total_recordings, 10);
    }

    #[test]
    fn test_merge_never_regresses_local_count() {
        let local = ParticipantProgress::new(12, 163, false);
        let server = ParticipantProgress::new(5, 163, false);
        assert_eq!(merge_progress(local, Some(&server)), local);
    }

    #[test]
    fn test_merge_adopts_server_completion() {
        let local = ParticipantProgress::new(163, 163, false);
        let server = ParticipantProgress::new(160, 163, true);
        let merged = merge_progress(local, Some(&server));
        assert_eq!(merged.total_recordings, 163);
        assert!(merged.is_complete);
    }

    #[test]
    fn test_next_prompt_position() {
        let catalog = ["A_1", "A_2", "B_1"];
        let recorded: HashSet<&str> = ["A_1"].into_iter().collect();
        let position = next_prompt_position(&catalog, |id| recorded.contains(id));
        assert_eq!(
            position,
            PromptPosition {
                index: 1,
                session_complete: false
            }
        );

        let all: HashSet<&str> = catalog.into_iter().collect();
        let done = next_prompt_position(&catalog, |id| all.contains(id));
        assert_eq!(done.index, 2);
        assert!(done.session_complete);

        let empty: [&str; 0] = [];
        let nothing = next_prompt_position(&empty, |_| false);
        assert_eq!(nothing.index, 0);
        assert!(nothing.session_complete);
    }
}
