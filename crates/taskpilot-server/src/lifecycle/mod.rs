//! Task lifecycle: admission, execution, settlement, and recovery from disk.

mod manager;
pub mod store;

pub use manager::{ManagerConfig, TaskManager, TaskStats};
pub use store::{
    INTERRUPTED_MESSAGE, OUTPUT_FILE, PROMPT_FILE, PersistedTask, REQUEST_FILE, RESPONSE_FILE,
    StoreError, TaskStore, WORKSPACE_DIR,
};
