//! Participant identity, demographics and recording progress.

mod progress;

pub use progress::{merge_progress, next_prompt_position, CompletionRule, PromptPosition};

use crate::error::{Result, SyncError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const CODE_PREFIX: &str = "TWI_Speaker_";

fn code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^TWI_Speaker_[0-9]{3}$").expect("static code pattern"))
}

/// Returns true for `TWI_Speaker_` followed by exactly three digits.
///
/// Surrounding whitespace is ignored; the prefix is case-sensitive.
pub fn is_valid_code(code: &str) -> bool {
    !code.is_empty() && code_pattern().is_match(code.trim())
}

pub fn ensure_valid_code(code: &str) -> Result<()> {
    if is_valid_code(code) {
        Ok(())
    } else {
        Err(SyncError::validation(format!(
            "invalid participant code {code:?}: expected {CODE_PREFIX}NNN"
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParticipantProgress {
    pub total_recordings: u32,
    pub total_required: u32,
    pub is_complete: bool,
}

impl ParticipantProgress {
    pub fn new(total_recordings: u32, total_required: u32, is_complete: bool) -> Self {
        Self {
            total_recordings,
            total_required,
            is_complete,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.total_required.saturating_sub(self.total_recordings)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParticipantDetails {
    pub code: String,
    pub dialect: Option<String>,
    pub age_range: Option<String>,
    pub gender: Option<String>,
    /// Cached summary; recomputed on reconciliation and after uploads.
    pub progress: Option<ParticipantProgress>,
}

impl ParticipantDetails {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into().trim().to_string(),
            ..Default::default()
        }
    }

    pub fn with_demographics(
        mut self,
        dialect: Option<String>,
        age_range: Option<String>,
        gender: Option<String>,
    ) -> Self {
        self.dialect = non_blank(dialect);
        self.age_range = non_blank(age_range);
        self.gender = non_blank(gender);
        self
    }

    pub fn validate(&self) -> Result<()> {
        ensure_valid_code(&self.code)
    }

    /// Fills demographic fields that are still empty locally. Never overwrites.
    /// Returns true when anything changed.
    pub fn backfill(
        &mut self,
        dialect: Option<&str>,
        age_range: Option<&str>,
        gender: Option<&str>,
    ) -> bool {
        let mut changed = false;
        for (slot, incoming) in [
            (&mut self.dialect, dialect),
            (&mut self.age_range, age_range),
            (&mut self.gender, gender),
        ] {
            if slot.is_none() {
                if let Some(value) = incoming.map(str::trim).filter(|v| !v.is_empty()) {
                    *slot = Some(value.to_string());
                    changed = true;
                }
            }
        }
        changed
    }
}

pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}
