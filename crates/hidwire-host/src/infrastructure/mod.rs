//! Infrastructure layer for the hidwire host.
//!
//! | Sub-module | Responsibility |
//! |---|---|
//! | `channel` | Report channel trait, simulated and in-memory backends |
//! | `transport` | Request correlation, session lifecycle, subscriptions |
//! | `storage` | TOML configuration |

pub mod channel;
pub mod storage;
pub mod transport;
