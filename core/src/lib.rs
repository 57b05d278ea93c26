//! reserve-core: program risk & opportunity register with a management
//! reserve ledger.
//!
//! Risks and opportunities move through a fixed disposition lifecycle.
//! A risk that materializes draws down its program's management reserve;
//! the draw-down and the disposition change commit together or not at all.

pub mod clock;
pub mod config;
pub mod desk;
pub mod disposition;
pub mod error;
pub mod materialize;
pub mod port;
pub mod register;
pub mod reserve;
pub mod ro_calculator;
pub mod scoring;
pub mod store;
pub mod types;
