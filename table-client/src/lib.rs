//! Table client - live waiter-call state for one dining table
//!
//! Fetches a table, subscribes to its row changes and reconciles both into
//! the phase a QR table page shows: idle, calling, attended.
//!
//! ```no_run
//! use table_client::{ClientPhase, MemoryBackend, SessionConfig, SessionServices, TableSession};
//! use shared::{TableKey, TableRecord};
//!
//! # async fn example() -> Result<(), table_client::ClientError> {
//! let backend = MemoryBackend::new().with_table(TableRecord::new(7, "7"));
//! let session = TableSession::start(
//!     Some(TableKey::Id(7)),
//!     SessionServices::memory(&backend),
//!     SessionConfig::default(),
//! );
//! session.wait_for_phase(ClientPhase::Idle).await?;
//! session.call_waiter().await?;
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod flags;
pub mod http;
pub mod logger;
pub mod memory;
pub mod message;
pub mod session;
pub mod store;
pub mod subscriber;
pub mod wifi;

pub use action::{PendingWrite, WaiterCall};
pub use config::{ClientConfig, SessionConfig};
pub use engine::{ClientPhase, ReconciliationEngine, TableView};
pub use error::{ClientError, ClientResult, FailureKind};
pub use fetcher::{FetchFailurePolicy, SnapshotFetcher};
pub use flags::{FileFlagStore, FlagStore, MemoryFlagStore};
pub use http::HttpClient;
pub use memory::MemoryBackend;
pub use message::{FeedClient, FeedClientConfig, MessageError};
pub use session::{SessionServices, TableSession};
pub use store::{ChangeFeed, FeedPublisher, FeedSubscription, TableSource, feed_channel};
pub use subscriber::ChangeFeedSubscriber;
pub use wifi::{RevealOutcome, VenueConfig, WifiGate};
