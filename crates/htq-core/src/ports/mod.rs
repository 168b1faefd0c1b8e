//! Ports - 抽象化レイヤー
//!
//! Traits for everything the lifecycle engine talks to: the durable store,
//! the outbound dispatcher, time and identifier generation.

pub mod clock;
pub mod dispatch;
pub mod id_generator;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::dispatch::{DispatchError, DispatchRequest, DispatchResponse, Dispatcher};
pub use self::id_generator::{IdGenerator, UuidGenerator};
pub use self::store::{Fields, Guard, Store, StoreError, Transaction, Versioned, WriteOp};
