//! Checkpoint Module
//!
//! Human-in-the-loop approval gates persisted as `checkpoint.*` events:
//! - `CheckpointProjection`: pending/resolved view rebuilt from the log
//! - `CheckpointManager`: request, resolve-once, expiry and waiting
//!
//! ```text
//!              request_checkpoint
//!                     │
//!                     ▼
//!               ┌───────────┐  approve   ┌──────────┐
//!               │  pending  │──────────►│ approved │
//!               └───────────┘            └──────────┘
//!                 │       │   reject     ┌──────────┐
//!                 │       └────────────►│ rejected │
//!                 │ timer                └──────────┘
//!                 ▼
//!            ┌─────────┐
//!            │ expired │
//!            └─────────┘
//! ```

mod manager;
mod projection;

pub use manager::{CheckpointManager, SYSTEM_ACTOR, TIMEOUT_REASON};
pub use projection::CheckpointProjection;
