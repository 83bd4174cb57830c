//! Pulls the server's view of a participant into local state.
//!
//! Missing recordings are only imported on request; profile backfill and the
//! progress merge happen on every refresh.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::{RecordingMetadata, UploadStatus};
use crate::error::{Result, SyncError};
use crate::participant::{
    ensure_valid_code, merge_progress, CompletionRule, ParticipantDetails, ParticipantProgress,
};
use crate::recording::DEFAULT_CONTENT_TYPE;
use crate::remote::{Connectivity, RemoteParticipant, RemoteRecording, RemoteService};
use crate::store::MetadataStore;

/// Server recordings the device does not have yet, awaiting confirmation.
#[derive(Debug, Clone)]
pub struct ReconcilePlan {
    pub participant_code: String,
    pub server: RemoteParticipant,
    pub missing: Vec<RemoteRecording>,
}

impl ReconcilePlan {
    pub fn missing_count(&self) -> usize {
        self.missing.len()
    }

    pub fn server_progress(&self) -> Option<&ParticipantProgress> {
        self.server.profile.progress.as_ref()
    }
}

/// Result of a refresh for one participant.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// The server has no record of this participant.
    UnknownToServer,
    Refreshed {
        plan: ReconcilePlan,
        profile_updated: bool,
        progress: ParticipantProgress,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    /// Already present locally by the time the import ran.
    pub skipped: usize,
    pub failed: usize,
}

pub struct Reconciler {
    store: Arc<MetadataStore>,
    remote: Arc<dyn RemoteService>,
    connectivity: Arc<dyn Connectivity>,
    rule: CompletionRule,
}

impl Reconciler {
    pub fn new(
        store: Arc<MetadataStore>,
        remote: Arc<dyn RemoteService>,
        connectivity: Arc<dyn Connectivity>,
        rule: CompletionRule,
    ) -> Self {
        Self {
            store,
            remote,
            connectivity,
            rule,
        }
    }

    /// Fetches the server view, backfills the profile, merges progress and
    /// works out which server recordings are missing locally.
    pub async fn refresh(&self, participant_code: &str) -> Result<RefreshOutcome> {
        ensure_valid_code(participant_code)?;
        if !self.connectivity.is_online().await {
            return Err(SyncError::Offline);
        }

        let Some(server) = self.remote.fetch_participant(participant_code).await? else {
            return Ok(RefreshOutcome::UnknownToServer);
        };

        let profile_updated = self.backfill_profile(participant_code, &server).await?;
        let plan = self.plan(participant_code, server).await?;
        let progress = self
            .reconcile_progress(participant_code, plan.server_progress())
            .await?;

        if plan.missing.is_empty() {
            info!("{} is in sync with the server", participant_code);
        } else {
            info!(
                "{} has {} recordings on the server that are not on this device",
                participant_code,
                plan.missing_count()
            );
        }

        Ok(RefreshOutcome::Refreshed {
            plan,
            profile_updated,
            progress,
        })
    }

    /// Server recordings whose prompt has no local recording, one per prompt.
    pub async fn plan(
        &self,
        participant_code: &str,
        server: RemoteParticipant,
    ) -> Result<ReconcilePlan> {
        let mut seen = self.local_prompt_ids(participant_code).await?;
        let missing = server
            .recordings
            .iter()
            .filter(|r| is_importable(r))
            .filter(|r| seen.insert(r.prompt_id.trim().to_string()))
            .cloned()
            .collect();

        Ok(ReconcilePlan {
            participant_code: participant_code.to_string(),
            server,
            missing,
        })
    }

    /// Saves the planned recordings as remote-backed entries, then re-merges progress.
    ///
    /// Prompts that gained a local recording since planning are skipped.
    pub async fn import(&self, plan: &ReconcilePlan) -> Result<ImportReport> {
        let code = plan.participant_code.as_str();
        let mut present = self.local_prompt_ids(code).await?;
        let mut report = ImportReport::default();

        for remote in &plan.missing {
            let prompt_id = remote.prompt_id.trim();
            if present.contains(prompt_id) {
                report.skipped += 1;
                continue;
            }

            let recording = imported_recording(code, remote);
            match self.store.upsert_recording(&recording).await {
                Ok(_) => {
                    present.insert(prompt_id.to_string());
                    report.imported += 1;
                }
                Err(e) => {
                    warn!("Failed to import server recording for {}: {}", prompt_id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Imported {} server recordings for {} ({} skipped, {} failed)",
            report.imported, code, report.skipped, report.failed
        );
        self.reconcile_progress(code, plan.server_progress()).await?;
        Ok(report)
    }

    /// Recomputes progress from local recordings and merges the server's figures.
    pub async fn reconcile_progress(
        &self,
        participant_code: &str,
        server: Option<&ParticipantProgress>,
    ) -> Result<ParticipantProgress> {
        let recordings = self.store.recordings_for(participant_code).await?;
        let local = self
            .rule
            .evaluate(recordings.iter().map(|r| r.prompt_id.as_str()));
        let merged = merge_progress(local, server);

        if merged != local {
            info!(
                "Adopted server progress for {}: {}/{}",
                participant_code, merged.total_recordings, merged.total_required
            );
        }
        self.store
            .update_progress(participant_code, &merged)
            .await?;
        Ok(merged)
    }

    /// Fills empty demographics from the server, or creates the profile if
    /// the device has never seen this participant.
    async fn backfill_profile(&self, code: &str, server: &RemoteParticipant) -> Result<bool> {
        let profile = &server.profile;
        let (mut details, existed) = match self.store.get_participant(code).await? {
            Some(details) => (details, true),
            None => (ParticipantDetails::new(code), false),
        };

        let changed = details.backfill(
            profile.dialect.as_deref(),
            profile.age_range.as_deref(),
            profile.gender.as_deref(),
        );
        if changed || !existed {
            self.store.upsert_participant(&details, false).await?;
            info!("Updated local profile for {} from server", code);
        }
        Ok(changed || !existed)
    }

    async fn local_prompt_ids(&self, code: &str) -> Result<HashSet<String>> {
        Ok(self
            .store
            .recordings_for(code)
            .await?
            .into_iter()
            .map(|r| r.prompt_id)
            .collect())
    }
}

fn is_importable(remote: &RemoteRecording) -> bool {
    !remote.prompt_id.trim().is_empty() && !remote.file_url.trim().is_empty()
}

fn imported_recording(participant_code: &str, remote: &RemoteRecording) -> RecordingMetadata {
    let prompt_id = remote.prompt_id.trim().to_string();
    let original_filename = remote
        .filename_original
        .clone()
        .filter(|name| !name.trim().is_empty())
        .or_else(|| {
            remote
                .file_url
                .rsplit('/')
                .next()
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("{prompt_id}.m4a"));

    RecordingMetadata {
        id: remote
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        participant_code: participant_code.to_string(),
        prompt_text: remote
            .prompt_text
            .clone()
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| prompt_id.clone()),
        prompt_id,
        timestamp: parse_uploaded_at(remote.uploaded_at.as_deref()),
        local_uri: remote.file_url.trim().to_string(),
        original_filename,
        content_type: remote
            .content_type
            .clone()
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        uploaded: true,
        upload_status: UploadStatus::Pending,
        recording_duration: remote.recording_duration,
        dialect: None,
        age_range: None,
        gender: None,
        session_id: remote.session_id.clone(),
        version: 0,
    }
}

/// Milliseconds since the epoch; falls back to now when absent or unreadable.
fn parse_uploaded_at(value: Option<&str>) -> i64 {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Utc::now().timestamp_millis();
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return parsed.timestamp_millis();
    }
    match NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(naive) => naive.and_utc().timestamp_millis(),
        Err(_) => {
            warn!("Unreadable uploaded_at {:?}; using current time", value);
            Utc::now().timestamp_millis()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobs::BlobStore;
    use crate::remote::RemoteProfile;
    use crate::test_support::{sample_recording, FakeConnectivity, FakeRemote};
    use tempfile::TempDir;

    const CODE: &str = "TWI_Speaker_007";

    struct Fixture {
        _dir: TempDir,
        store: Arc<MetadataStore>,
        remote: Arc<FakeRemote>,
        connectivity: Arc<FakeConnectivity>,
        reconciler: Reconciler,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            MetadataStore::open_in_memory(BlobStore::new(dir.path().join("recordings"))).unwrap(),
        );
        let remote = Arc::new(FakeRemote::default());
        let connectivity = Arc::new(FakeConnectivity::new(true));
        let reconciler = Reconciler::new(
            store.clone(),
            remote.clone(),
            connectivity.clone(),
            CompletionRule::default(),
        );
        Fixture {
            _dir: dir,
            store,
            remote,
            connectivity,
            reconciler,
        }
    }

    fn server_recording(prompt_id: &str) -> RemoteRecording {
        RemoteRecording {
            id: Some(format!("srv-{prompt_id}")),
            prompt_id: prompt_id.to_string(),
            prompt_text: Some(format!("text for {prompt_id}")),
            uploaded_at: Some("2025-04-01T10:05:00+00:00".to_string()),
            file_url: format!("https://cdn.example.com/{CODE}/{prompt_id}.m4a"),
            ..Default::default()
        }
    }

    fn server_with(prompts: &[&str], profile: RemoteProfile) -> RemoteParticipant {
        RemoteParticipant {
            profile,
            recordings: prompts.iter().map(|p| server_recording(p)).collect(),
        }
    }

    fn plan_of(outcome: RefreshOutcome) -> ReconcilePlan {
        match outcome {
            RefreshOutcome::Refreshed { plan, .. } => plan,
            RefreshOutcome::UnknownToServer => panic!("participant should be known"),
        }
    }

    #[tokio::test]
    async fn test_imports_missing_server_recordings() {
        let fx = fixture();
        fx.store
            .upsert_participant(&ParticipantDetails::new(CODE), true)
            .await
            .unwrap();
        fx.remote.add_participant(
            CODE,
            server_with(&["A_1", "A_2", "B_5"], RemoteProfile::default()),
        );

        let plan = plan_of(fx.reconciler.refresh(CODE).await.unwrap());
        assert_eq!(plan.missing_count(), 3);
        assert!(fx.store.recordings_for(CODE).await.unwrap().is_empty());

        let report = fx.reconciler.import(&plan).await.unwrap();
        assert_eq!(report.imported, 3);

        let local = fx.store.recordings_for(CODE).await.unwrap();
        assert_eq!(local.len(), 3);
        for recording in &local {
            assert!(recording.uploaded);
            assert_eq!(
                recording.local_uri,
                format!("https://cdn.example.com/{CODE}/{}.m4a", recording.prompt_id)
            );
            assert!(fx.store.blobs().exists(&recording.local_uri).await);
        }
        assert_eq!(local[0].id, "srv-A_1");
        assert_eq!(local[0].timestamp, 1_743_501_900_000);

        let progress = fx
            .store
            .get_participant(CODE)
            .await
            .unwrap()
            .unwrap()
            .progress
            .unwrap();
        assert_eq!(progress.total_recordings, 3);
        assert!(!progress.is_complete);
    }

    #[tokio::test]
    async fn test_local_prompt_wins_over_server_copy() {
        let fx = fixture();
        fx.store
            .upsert_recording(&sample_recording("local-1", CODE, "A_1", "/tmp/a1.m4a"))
            .await
            .unwrap();
        fx.remote.add_participant(
            CODE,
            server_with(&["A_1", "A_2", "A_2"], RemoteProfile::default()),
        );

        let plan = plan_of(fx.reconciler.refresh(CODE).await.unwrap());
        assert_eq!(plan.missing_count(), 1);
        assert_eq!(plan.missing[0].prompt_id, "A_2");

        fx.reconciler.import(&plan).await.unwrap();
        let local = fx.store.recordings_for(CODE).await.unwrap();
        assert_eq!(local.len(), 2);
        let a1 = local.iter().find(|r| r.prompt_id == "A_1").unwrap();
        assert_eq!(a1.id, "local-1");
        assert_eq!(a1.local_uri, "/tmp/a1.m4a");
    }

    #[tokio::test]
    async fn test_import_rechecks_prompts_recorded_after_planning() {
        let fx = fixture();
        fx.remote.add_participant(
            CODE,
            server_with(&["A_1", "A_2"], RemoteProfile::default()),
        );
        let plan = plan_of(fx.reconciler.refresh(CODE).await.unwrap());
        assert_eq!(plan.missing_count(), 2);

        fx.store
            .upsert_recording(&sample_recording("fresh", CODE, "A_2", "/tmp/fresh.m4a"))
            .await
            .unwrap();

        let report = fx.reconciler.import(&plan).await.unwrap();
        assert_eq!(
            report,
            ImportReport {
                imported: 1,
                skipped: 1,
                failed: 0
            }
        );
        let a2: Vec<_> = fx
            .store
            .recordings_for(CODE)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.prompt_id == "A_2")
            .collect();
        assert_eq!(a2.len(), 1);
        assert_eq!(a2[0].id, "fresh");
    }

    #[tokio::test]
    async fn test_profile_backfill_never_overwrites() {
        let fx = fixture();
        let local = ParticipantDetails::new(CODE).with_demographics(
            Some("Akuapem".into()),
            None,
            None,
        );
        fx.store.upsert_participant(&local, true).await.unwrap();
        fx.remote.add_participant(
            CODE,
            server_with(
                &[],
                RemoteProfile {
                    dialect: Some("Asante".into()),
                    age_range: Some("26-35".into()),
                    gender: None,
                    progress: None,
                },
            ),
        );

        match fx.reconciler.refresh(CODE).await.unwrap() {
            RefreshOutcome::Refreshed {
                profile_updated, ..
            } => assert!(profile_updated),
            RefreshOutcome::UnknownToServer => panic!("participant should be known"),
        }

        let stored = fx.store.get_participant(CODE).await.unwrap().unwrap();
        assert_eq!(stored.dialect.as_deref(), Some("Akuapem"));
        assert_eq!(stored.age_range.as_deref(), Some("26-35"));
        assert!(stored.gender.is_none());
    }

    #[tokio::test]
    async fn test_progress_never_regresses() {
        let fx = fixture();
        fx.store
            .upsert_participant(&ParticipantDetails::new(CODE), true)
            .await
            .unwrap();
        for i in 0..4 {
            fx.store
                .upsert_recording(&sample_recording(
                    &format!("rec-{i}"),
                    CODE,
                    &format!("A_{i}"),
                    "/tmp/x.m4a",
                ))
                .await
                .unwrap();
        }

        let lower = ParticipantProgress::new(2, 163, false);
        let merged = fx
            .reconciler
            .reconcile_progress(CODE, Some(&lower))
            .await
            .unwrap();
        assert_eq!(merged.total_recordings, 4);

        let higher = ParticipantProgress::new(160, 163, true);
        let merged = fx
            .reconciler
            .reconcile_progress(CODE, Some(&higher))
            .await
            .unwrap();
        assert_eq!(merged, ParticipantProgress::new(160, 163, true));
    }

    #[tokio::test]
    async fn test_unknown_participant_and_offline() {
        let fx = fixture();
        assert!(matches!(
            fx.reconciler.refresh(CODE).await.unwrap(),
            RefreshOutcome::UnknownToServer
        ));

        fx.connectivity.set_online(false);
        assert!(matches!(
            fx.reconciler.refresh(CODE).await,
            Err(SyncError::Offline)
        ));
    }

    #[tokio::test]
    async fn test_unknown_device_participant_is_created() {
        let fx = fixture();
        fx.remote.add_participant(
            CODE,
            server_with(
                &["A_1"],
                RemoteProfile {
                    gender: Some("Male".into()),
                    ..Default::default()
                },
            ),
        );

        fx.reconciler.refresh(CODE).await.unwrap();
        let created = fx.store.get_participant(CODE).await.unwrap().unwrap();
        assert_eq!(created.gender.as_deref(), Some("Male"));
        assert_eq!(created.progress.unwrap().total_recordings, 0);
    }

    #[test]
    fn test_imported_recording_defaults() {
        let remote = RemoteRecording {
            prompt_id: " B_5 ".into(),
            file_url: "https://cdn.example.com/x/B_5_take.m4a".into(),
            uploaded_at: Some("2025-04-01T10:05:00.123".into()),
            ..Default::default()
        };
        let recording = imported_recording(CODE, &remote);

        assert_eq!(recording.prompt_id, "B_5");
        assert_eq!(recording.prompt_text, "B_5");
        assert_eq!(recording.original_filename, "B_5_take.m4a");
        assert_eq!(recording.content_type, "audio/mp4");
        assert_eq!(recording.timestamp, 1_743_501_900_123);
        assert!(recording.uploaded);
        assert!(!recording.id.is_empty());
    }
}
