pub mod events;
pub mod scores;
pub mod snapshots;

pub use events::{event_history, insert_event, load_subject_events, NewEvent};
pub use scores::{
    get_score_record, list_score_records_after, lock_score_record, update_score_record,
};
pub use snapshots::{insert_snapshot, list_snapshots};
