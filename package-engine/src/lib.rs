//! # Package configuration engine
//!
//! This library brings the local host into a declaratively requested package
//! state (install or uninstall a named package at a version), with
//! idempotence, crash- and reboot-safety, rollback on install failure and
//! mutual exclusion across concurrent requests for the same package. The
//! fleet agent embedding this crate drives it through [`engine::Engine`].

pub mod cancel;
pub mod config;
pub mod engine;
pub mod extract;
pub mod installer;
pub mod package_id;
pub mod platform;
pub mod repository;
pub mod service;
pub mod trace;

#[cfg(test)]
pub(crate) mod test_support;
