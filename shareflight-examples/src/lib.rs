//! Example implementations using the Shareflight resource-sharing library.
//!
//! The [`sessions`] module shows the keyed variant in its natural habitat:
//! one backend session per connection string, shared by every concurrent
//! caller, torn down when the last caller releases it - optionally with a
//! short linger so bursty workloads reuse the session instead of
//! reconnecting.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod sessions;
