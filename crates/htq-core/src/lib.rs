//! htq-core
//!
//! Core building blocks for htq, a durable queue of outbound HTTP requests.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, request, response, errors）
//! - **ports**: 抽象化レイヤー（Store, Dispatcher, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryStore, RedisStore, HttpDispatcher）
//! - **keys / repo / queue**: ストア上のキー配置、レコードの読み書き、FIFO キュー
//! - **app**: Engine, EngineBuilder, WorkerGroup
//! - **config**: 環境変数からの設定読み込み

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod keys;
pub mod ports;
pub mod queue;
pub mod repo;

pub use app::{BuildError, Engine, EngineBuilder, WorkerGroup};
pub use config::{Config, ConfigError, StoreBackend};
pub use domain::{HtqError, Request, RequestId, RequestStatus, Response, ResponseOutcome, SendRequest};
