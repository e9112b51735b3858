#![doc(test(attr(deny(warnings))))]

//! Manifest builder walks an operator through discovering a Kubernetes
//! application and its Prometheus metrics, then writes the servo
//! configuration and optimizer override manifests that optimize it.
//!
//! The [`wizard`] engine is generic over the session payload; [`discovery`]
//! supplies the modules that drive a real run.

pub mod backend;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod emit;
pub mod errors;
pub mod prompt;
pub mod utils;
pub mod wizard;

use std::sync::Once;

static INIT_TRACING: Once = Once::new();

/// Initializes global tracing and emits a startup info log.
pub fn init() {
    INIT_TRACING.call_once(|| {
        utils::init_tracing();
        tracing::info!("Manifest builder tracing initialized.");
    });
}
