use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

pub mod accounts;
pub mod error;
pub mod media_files;
pub mod message_streaming;
pub mod message_window;
pub mod messages;
pub mod storage;
pub mod store;
pub mod utils;

use crate::generation::{GenerationClient, HttpGenerationClient};
use crate::init_tracing;
use accounts::{AuthProvider, InMemoryAuth};
use error::{LiveChatError, Result};
use message_streaming::{LiveWindow, WindowSubscription};
use message_window::{Message, WindowConfig};
use storage::{BlobStore, InMemoryBlobStore};
use store::{InMemoryStore, RealtimeStore};
use utils::MessageClock;

/// System prompt the chat sends along with its reply requests
pub const CLIENT_SYSTEM_PROMPT: &str = "Du bist ein lustiger und sarkastischer Assistent. Antworte kurz und nutze die vorhandenen Nachrichten als Kontext.";

#[derive(Clone, Debug)]
pub struct LiveChatConfig {
    /// Directory for application data
    pub data_dir: PathBuf,

    /// Directory for application logs
    pub logs_dir: PathBuf,

    /// Collection path the chat messages live under
    pub messages_path: String,

    /// Page size and logging of the live window
    pub window: WindowConfig,

    /// Full URL of the reply generation route
    pub generation_endpoint: String,

    /// Sent with every reply request; `None` lets the route use its default
    pub system_prompt: Option<String>,

    /// Path prefix for uploaded images
    pub upload_prefix: String,
}

impl LiveChatConfig {
    pub fn new(data_dir: &Path, logs_dir: &Path) -> Self {
        let env_suffix = if cfg!(debug_assertions) {
            "dev"
        } else {
            "release"
        };

        Self {
            data_dir: data_dir.join(env_suffix),
            logs_dir: logs_dir.join(env_suffix),
            messages_path: "messages".to_string(),
            window: WindowConfig::default(),
            generation_endpoint: "http://localhost:3000/api/chat".to_string(),
            system_prompt: Some(CLIENT_SYSTEM_PROMPT.to_string()),
            upload_prefix: "uploads".to_string(),
        }
    }
}

/// Handles to the remote services the chat depends on
#[derive(Clone)]
pub struct Collaborators {
    pub auth: Arc<dyn AuthProvider>,
    pub store: Arc<dyn RealtimeStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub generator: Arc<dyn GenerationClient>,
}

impl Collaborators {
    /// In-process auth, store and blob storage, with replies from the HTTP route at
    /// `generation_endpoint`
    pub fn in_memory(generation_endpoint: &str) -> Self {
        Self {
            auth: Arc::new(InMemoryAuth::new()),
            store: Arc::new(InMemoryStore::new()),
            blobs: Arc::new(InMemoryBlobStore::default()),
            generator: Arc::new(HttpGenerationClient::new(generation_endpoint)),
        }
    }
}

pub struct LiveChat {
    pub config: LiveChatConfig,
    auth: Arc<dyn AuthProvider>,
    store: Arc<dyn RealtimeStore>,
    blobs: Arc<dyn BlobStore>,
    generator: Arc<dyn GenerationClient>,
    live: LiveWindow,
    clock: MessageClock,
    http: reqwest::Client,
}

impl std::fmt::Debug for LiveChat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveChat")
            .field("config", &self.config)
            .field("auth", &"<REDACTED>")
            .field("store", &"<REDACTED>")
            .field("blobs", &"<REDACTED>")
            .field("generator", &"<REDACTED>")
            .finish()
    }
}

impl LiveChat {
    /// Builds a chat over the given collaborators without touching the filesystem.
    pub fn new(config: LiveChatConfig, collaborators: Collaborators) -> Self {
        let live = LiveWindow::new(
            collaborators.store.clone(),
            &config.messages_path,
            config.window.clone(),
        );
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();

        Self {
            config,
            auth: collaborators.auth,
            store: collaborators.store,
            blobs: collaborators.blobs,
            generator: collaborators.generator,
            live,
            clock: MessageClock::new(),
            http,
        }
    }

    /// Initializes the chat: creates the data and log directories, sets up logging, and
    /// wires the collaborators.
    ///
    /// # Arguments
    ///
    /// * `config` - A [`LiveChatConfig`] specifying the directories and chat settings.
    /// * `collaborators` - The auth, store, blob storage and generation handles.
    ///
    /// # Errors
    ///
    /// Returns an error if the data or log directories cannot be created.
    pub fn initialize(config: LiveChatConfig, collaborators: Collaborators) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", config.data_dir))
            .map_err(LiveChatError::from)?;
        std::fs::create_dir_all(&config.logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", config.logs_dir))
            .map_err(LiveChatError::from)?;

        // Only initialize tracing once
        init_tracing(&config.logs_dir);

        tracing::debug!(
            target: "livechat::initialize",
            "Logging initialized in directory: {:?}",
            config.logs_dir
        );

        Ok(Self::new(config, collaborators))
    }

    /// Subscribes the live window for the current user. Does nothing when already active.
    pub async fn activate(&self) -> Result<()> {
        self.live.activate().await
    }

    /// Releases the live subscription and clears the window
    pub async fn deactivate(&self) {
        self.live.deactivate().await
    }

    pub fn is_active(&self) -> bool {
        self.live.is_active()
    }

    /// The window as it should be rendered, ascending by timestamp
    pub fn messages(&self) -> Vec<Message> {
        self.live.messages()
    }

    pub fn oldest_timestamp(&self) -> Option<i64> {
        self.live.oldest_timestamp()
    }

    pub fn is_loading_older(&self) -> bool {
        self.live.is_loading_older()
    }

    /// Current window plus a receiver for every later change
    pub fn subscribe_to_messages(&self) -> WindowSubscription {
        self.live.subscribe()
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use std::sync::Arc;

    use super::*;
    use crate::generation::GenerationError;

    /// Generation client returning a canned reply and recording what it was asked
    #[derive(Default)]
    pub(crate) struct CannedGenerator {
        pub reply: Option<String>,
        pub calls: std::sync::Mutex<Vec<(usize, Option<String>)>>,
    }

    #[async_trait::async_trait]
    impl GenerationClient for CannedGenerator {
        async fn generate_reply(
            &self,
            messages: &[Message],
            system_prompt: Option<&str>,
        ) -> std::result::Result<String, GenerationError> {
            self.calls
                .lock()
                .unwrap()
                .push((messages.len(), system_prompt.map(str::to_string)));
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => Err(GenerationError::Status {
                    status: 500,
                    message: "Fehler bei der OpenAI-Anfrage".to_string(),
                }),
            }
        }
    }

    pub(crate) struct TestChat {
        pub chat: Arc<LiveChat>,
        pub auth: Arc<InMemoryAuth>,
        pub store: Arc<InMemoryStore>,
        pub blobs: Arc<InMemoryBlobStore>,
        pub generator: Arc<CannedGenerator>,
    }

    pub(crate) fn test_chat(reply: Option<&str>) -> TestChat {
        let auth = Arc::new(InMemoryAuth::new());
        let store = Arc::new(InMemoryStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new("https://blobs.test"));
        let generator = Arc::new(CannedGenerator {
            reply: reply.map(str::to_string),
            ..CannedGenerator::default()
        });
        let mut config = LiveChatConfig::new(
            std::path::Path::new("./data"),
            std::path::Path::new("./logs"),
        );
        config.window.page_size = 5;
        let chat = LiveChat::new(
            config,
            Collaborators {
                auth: auth.clone(),
                store: store.clone(),
                blobs: blobs.clone(),
                generator: generator.clone(),
            },
        );
        TestChat {
            chat: Arc::new(chat),
            auth,
            store,
            blobs,
            generator,
        }
    }

    /// Polls until the window holds `count` messages
    pub(crate) async fn wait_for_len(chat: &LiveChat, count: usize) {
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while chat.messages().len() != count {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("window reached expected size");
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = LiveChatConfig::new(
            Path::new("/tmp/livechat/data"),
            Path::new("/tmp/livechat/logs"),
        );
        assert_eq!(config.messages_path, "messages");
        assert_eq!(config.window.page_size, 50);
        assert_eq!(config.upload_prefix, "uploads");
        assert!(config.data_dir.starts_with("/tmp/livechat/data"));
        assert!(config.logs_dir.starts_with("/tmp/livechat/logs"));
        assert_eq!(config.system_prompt.as_deref(), Some(CLIENT_SYSTEM_PROMPT));
    }

    #[test]
    fn test_initialize_creates_logs_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = LiveChatConfig::new(&temp.path().join("data"), &temp.path().join("logs"));
        let data_dir = config.data_dir.clone();
        let logs_dir = config.logs_dir.clone();

        let chat =
            LiveChat::initialize(config, Collaborators::in_memory("http://127.0.0.1:9/api/chat"))
                .unwrap();

        assert!(data_dir.is_dir());
        assert!(logs_dir.is_dir());
        assert!(!chat.is_active());
        assert!(format!("{:?}", chat).contains("<REDACTED>"));
    }

    #[tokio::test]
    async fn test_presence_watcher_follows_auth_state() {
        let test = test_chat(None);
        let watcher = test.chat.spawn_presence_watcher();

        test.chat.register("a@example.com", "secret1").await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while !test.chat.is_active() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        test.auth.sign_out().await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while test.chat.is_active() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(test.store.subscriber_count(), 0);

        watcher.abort();
    }
}
