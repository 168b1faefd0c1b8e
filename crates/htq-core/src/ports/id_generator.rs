//! IdGenerator port - ID 生成の抽象化
//!
//! Abstracted so tests can force identifier collisions.

use crate::domain::RequestId;

pub trait IdGenerator: Send + Sync {
    fn generate_request_id(&self) -> RequestId;
}

/// Random v4 UUIDs (production).
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate_request_id(&self) -> RequestId {
        RequestId::new_random()
    }
}
