//! EngineBuilder - エンジンの構築とワイヤリング
//!
//! Collects the store, dispatcher and the optional collaborators, checks the
//! settings once at start-up, and hands back a ready `Engine`.

use std::sync::Arc;

use super::engine::{Engine, EngineSettings};
use crate::config::{Config, StoreBackend};
use crate::impls::{HttpDispatcher, InMemoryStore, RedisStore};
use crate::keys::Keyspace;
use crate::ports::{
    Clock, DispatchError, Dispatcher, IdGenerator, Store, StoreError, SystemClock, UuidGenerator,
};

/// EngineBuilder は Engine を構築
///
/// # 使用例
/// ```ignore
/// let engine = EngineBuilder::new(Arc::new(InMemoryStore::new()))
///     .dispatcher(Arc::new(HttpDispatcher::new()?))
///     .default_timeout_ms(5_000)
///     .build()?;
/// ```
pub struct EngineBuilder {
    store: Arc<dyn Store>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    keys: Keyspace,
    settings: EngineSettings,
}

/// BuildError はエンジン構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no dispatcher configured; call .dispatcher(...) before build()")]
    MissingDispatcher,

    #[error("default timeout must be greater than zero")]
    InvalidTimeout,

    #[error("max cancel attempts must be at least 1")]
    InvalidCancelAttempts,

    #[error("store setup failed: {0}")]
    Store(#[from] StoreError),

    #[error("dispatcher setup failed: {0}")]
    Dispatch(#[from] DispatchError),
}

impl EngineBuilder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            dispatcher: None,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidGenerator),
            keys: Keyspace::default(),
            settings: EngineSettings::default(),
        }
    }

    /// Store, dispatcher and settings as described by `config`.
    ///
    /// Opening a Redis store does not connect; the first operation does.
    pub fn from_config(config: &Config) -> Result<Self, BuildError> {
        let store: Arc<dyn Store> = match &config.store {
            StoreBackend::Memory => Arc::new(InMemoryStore::new()),
            StoreBackend::Redis(url) => Arc::new(RedisStore::open(url)?),
        };
        Ok(Self::new(store)
            .dispatcher(Arc::new(HttpDispatcher::new()?))
            .keyspace(Keyspace::new(config.key_prefix.clone()))
            .default_timeout_ms(config.default_timeout_ms)
            .max_cancel_attempts(config.cancel_max_attempts))
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn keyspace(mut self, keys: Keyspace) -> Self {
        self.keys = keys;
        self
    }

    pub fn default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.settings.default_timeout_ms = timeout_ms;
        self
    }

    pub fn max_cancel_attempts(mut self, attempts: u32) -> Self {
        self.settings.max_cancel_attempts = attempts;
        self
    }

    /// # 検証
    /// - dispatcher が設定されているか
    /// - default timeout / cancel attempts が 0 でないか
    pub fn build(self) -> Result<Engine, BuildError> {
        let dispatcher = self.dispatcher.ok_or(BuildError::MissingDispatcher)?;
        if self.settings.default_timeout_ms == 0 {
            return Err(BuildError::InvalidTimeout);
        }
        if self.settings.max_cancel_attempts == 0 {
            return Err(BuildError::InvalidCancelAttempts);
        }
        Ok(Engine::new(
            self.store,
            dispatcher,
            self.clock,
            self.ids,
            self.keys,
            self.settings,
        ))
    }
}
