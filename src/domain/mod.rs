//! Domain layer
//!
//! Entities, value objects, the pure planning service and the ports the
//! outer layers implement. Nothing in here performs I/O.

pub mod entities;
pub mod errors;
pub mod ports;
pub mod services;
pub mod value_objects;
