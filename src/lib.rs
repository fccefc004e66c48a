//! A live chat client core with reply suggestions.
//!
//! [`LiveChat`] keeps a sorted, paginated window over a realtime message collection,
//! sends and deletes messages for the signed-in user, uploads images and asks the
//! [`generation`] route for reply suggestions.

pub mod generation;
pub mod livechat;

pub use crate::livechat::accounts::{AuthError, AuthProvider, InMemoryAuth, User};
pub use crate::livechat::error::{LiveChatError, Operation, Result};
pub use crate::livechat::media_files::UploadedImage;
pub use crate::livechat::message_streaming::{UpdateTrigger, WindowSubscription, WindowUpdate};
pub use crate::livechat::message_window::{
    ChildEvent, LoadOlderOutcome, Message, MessagePayload, MessageWindow, WindowConfig,
};
pub use crate::livechat::messages::is_own_message;
pub use crate::livechat::storage::{BlobStore, InMemoryBlobStore, StorageError};
pub use crate::livechat::store::{InMemoryStore, RealtimeStore, StoreError};
pub use crate::livechat::{Collaborators, LiveChat, LiveChatConfig};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt::Layer, prelude::*, registry::Registry};

use std::sync::{Mutex, OnceLock};

static TRACING_GUARDS: OnceLock<Mutex<Option<(WorkerGuard, WorkerGuard)>>> = OnceLock::new();
static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs stdout and daily-rotating file logging under `logs_dir`. Only the first
/// call has an effect.
pub fn init_tracing(logs_dir: &std::path::Path) {
    TRACING_INIT.get_or_init(|| {
        let file_appender = match tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_prefix("livechat")
            .filename_suffix("log")
            .build(logs_dir)
        {
            Ok(appender) => appender,
            Err(e) => {
                eprintln!("Failed to create file appender in {:?}: {}", logs_dir, e);
                return;
            }
        };

        let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
        let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

        TRACING_GUARDS
            .set(Mutex::new(Some((file_guard, stdout_guard))))
            .ok();

        let stdout_layer = Layer::new()
            .with_writer(non_blocking_stdout)
            .with_ansi(true)
            .with_target(true);

        let file_layer = Layer::new()
            .with_writer(non_blocking_file)
            .with_ansi(false)
            .with_target(true);

        // A test harness may already have installed a subscriber
        let _ = Registry::default()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(stdout_layer)
            .with(file_layer)
            .try_init();
    });
}
