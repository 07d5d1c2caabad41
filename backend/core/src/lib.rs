pub mod error;
pub mod traits;
pub mod types;

pub use error::{StoreError, VibeError};
pub use traits::{ProgressStore, UserResolver};
pub use types::{
    now_ms, Day, DayProgress, FieldKey, FieldSlot, ProgressWrite, SyncField, User, UserId,
    WriteAck, WriteVersion,
};
