mod reconcile;
mod upload;

pub use reconcile::{ImportReport, ReconcilePlan, Reconciler, RefreshOutcome};
pub use upload::{
    UploadBoard, UploadOutcome, UploadQueue, UploadStatusHandle, UploadSummary,
};
