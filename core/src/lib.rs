pub mod api;
pub mod config;
pub mod error;
pub mod guard;
pub mod identity;
pub mod model;
pub mod navigator;
pub mod session;
pub mod sse;
pub mod storage;
pub mod telemetry;

pub use api::{ApiClient, ApiEvent};
pub use config::{ClientSettings, ConfigError};
pub use error::ApiError;
pub use guard::{GuardDecision, Route, RouteGuard, SessionSynchronizer, SyncOutcome};
pub use identity::{AuthResponse, IdentityClient, TwoFactorSettings};
pub use model::{ChatMessage, Conversation, ConversationMemory, MessageType};
pub use navigator::Navigator;
pub use session::{Session, SessionStore};
pub use sse::{ChatStream, SseLineDecoder, StreamEvent};
pub use storage::{DurableStorage, FileStorage, MemoryStorage, SharedStorage, StorageError};
