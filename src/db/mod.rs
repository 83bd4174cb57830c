mod init;
mod participants;
mod recordings;
mod schemas;


pub use init::{migrate, open_db, SCHEMA_VERSION};
pub use participants::ParticipantRepository;
pub use recordings::{RecordingRepository, UpsertOutcome};
pub use schemas::{
    is_remote_uri, DroppedRow, LoadReport, RecordingMetadata, RowOutcome, RowRef, UploadStatus,
};

use rusqlite::types::ValueRef;
use rusqlite::Row;

/// Lenient text read: integers are stringified, blobs and bad UTF-8 read as absent.
pub(crate) fn text_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Text(bytes) => std::str::from_utf8(bytes).ok().map(str::to_string),
        ValueRef::Integer(value) => Some(value.to_string()),
        ValueRef::Real(value) => Some(value.to_string()),
        ValueRef::Null | ValueRef::Blob(_) => None,
    })
}

/// Lenient integer read: numeric text is parsed, anything else reads as absent.
pub(crate) fn int_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<i64>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Integer(value) => Some(value),
        ValueRef::Real(value) => Some(value as i64),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.trim().parse().ok()),
        ValueRef::Null | ValueRef::Blob(_) => None,
    })
}
