//! Ratewarden - Distributed Rate Limiting Engine
//!
//! This crate decides whether a caller identified by a string (an IP address,
//! an email, an account id) may perform an action in a category such as
//! `LOGIN_ATTEMPT` or `OTP_SMS`. Quota state lives in a shared store, so any
//! number of instances enforce the same limits. Fixed window, sliding window
//! and token bucket algorithms are available, alone or combined, along with a
//! cache-aside helper sharing the same store.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
