//! Adapters
//!
//! `inbound`: the HTTP control API. `outbound`: implementations of the
//! domain ports against servers, proxies, secret stores and the host.

pub mod inbound;
pub mod outbound;
