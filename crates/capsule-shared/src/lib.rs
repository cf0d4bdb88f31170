//! # capsule-shared
//!
//! Types and rules shared by the time capsule client and server: the capsule
//! data model, the injectable [`clock::Clock`], the lifecycle engine that
//! decides lock state and who may touch a capsule, the signed session token
//! format, and the JSON wire DTOs.

pub mod clock;
pub mod constants;
pub mod error;
pub mod lifecycle;
pub mod protocol;
pub mod token;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AuthzError, ScheduleField, TokenError, ValidationError};
pub use types::*;
