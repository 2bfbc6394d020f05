//! BCI-Processing: filter framework for block-oriented signal processing
//!
//! Filters are registered under position keys, instantiated into a
//! [`FilterChain`], and driven through a fixed lifecycle (preflight,
//! initialize, start run, process, stop run, halt). A [`Session`] wraps a
//! chain and decides which block results reach storage and visualization.

pub mod chain;
pub mod config;
pub mod environment;
pub mod filter;
pub mod fir;
pub mod registry;
pub mod session;

pub use chain::{ChainMetrics, ChainState, FilterChain, RUNNING};
pub use config::{SessionConfig, SourceConfig};
pub use environment::{Diagnostic, Diagnostics, Environment, Phase};
pub use filter::{FilterDeclaration, GenericFilter};
pub use fir::{FirFilter, Integration};
pub use registry::{builtin_registry, FilterFactory, FilterRegistration, FilterRegistry, FrozenRegistry};
pub use session::{BlockOutput, Session};
