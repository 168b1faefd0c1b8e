//! App - アプリケーション層
//!
//! ports を組み合わせてリクエストのライフサイクルを実装します。
//!
//! # 主要コンポーネント
//! - **Engine**: send / receive / cancel と参照系の操作
//! - **EngineBuilder**: エンジンの構築とワイヤリング
//! - **WorkerGroup**: pop → receive を回すワーカー群

pub mod builder;
pub mod engine;
pub mod worker_loop;

#[cfg(test)]
pub(crate) mod testing;

pub use self::builder::{BuildError, EngineBuilder};
pub use self::engine::{DEFAULT_CANCEL_ATTEMPTS, Engine, EngineSettings};
pub use self::worker_loop::WorkerGroup;
