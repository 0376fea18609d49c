//! Mint Mempool - pending-transaction feed and front-run watcher

pub mod feed;
pub mod json_path;
pub mod watcher;

pub use feed::{PendingFeed, WsPendingFeed};
pub use watcher::{
    DispatchTrigger, FrontRunWatcher, MessageOutcome, WatchOutcome, WatcherConfig, WatcherError, WatcherState,
};
