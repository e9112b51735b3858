//! The manifest builder flow, written as modules over the wizard engine.
//!
//! The builder module drives the run and installs the cluster, metrics and
//! load modules as it goes. Each child publishes what it discovered into the
//! shared [`Discovery`] state and its part of the servo configuration, then
//! hands control back to the builder step it was given.

/// Declares a module's step enum together with its persisted names.
macro_rules! step_kind {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $label:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl $crate::wizard::StepKind for $name {
            fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($label => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

pub mod builder;
pub mod cluster;
pub mod load;
pub mod metrics;
pub mod record;
pub mod units;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::{ClusterBackend, MetricsBackend, Service};
use crate::config::BuilderConfig;
use crate::emit::ArtifactEmitter;
use crate::wizard::{Session, StepContext};

pub use builder::{BuilderModule, BuilderStep};
pub use cluster::{ClusterModule, ClusterStep};
pub use load::{LoadModule, LoadStep};
pub use metrics::{MetricsModule, MetricsStep};
pub use record::{DiscoveryModule, ModuleRecord};

/// State shared between discovery modules for one run.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Configured values, never changed by the run.
    pub settings: BuilderConfig,
    pub credentials: Credentials,
    pub topology: Topology,
}

impl Discovery {
    pub fn new(settings: BuilderConfig) -> Self {
        Self {
            settings,
            credentials: Credentials::default(),
            topology: Topology::default(),
        }
    }
}

/// Account details the servo will authenticate with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub account: Option<String>,
    pub app: Option<String>,
    pub token: Option<String>,
}

/// What cluster discovery found out about the target application.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    pub context: Option<String>,
    pub namespace: Option<String>,
    pub deployment: Option<String>,
    pub match_labels: BTreeMap<String, String>,
    pub services: Vec<Service>,
    pub prometheus: Option<Service>,
}

pub type DiscoverySession = Session<Discovery>;
pub type DiscoveryContext<'a> = StepContext<'a, Discovery>;

/// Collaborators the modules talk to. Cloned into every child module.
#[derive(Clone)]
pub struct Backends {
    pub cluster: Arc<dyn ClusterBackend>,
    pub metrics: Arc<dyn MetricsBackend>,
    pub emitter: Arc<dyn ArtifactEmitter>,
}
