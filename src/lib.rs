//! resorb resolves services to healthy backend addresses for RPC clients.
//!
//! It uses the following terminology:
//! * Services are named entities providing the same interface.
//! * Backends are the addresses at which a service is reachable. A single
//!   service is usually provided by multiple backends.
//! * A resolver belongs to one client connection. It tracks a service's
//!   backends, checks which of them are alive, and tells the connection
//!   whenever that set changes.
//!
//! # Usage
//!
//! * Hosts register services with a [builder::ListBuilder], either with an
//!   explicit list of backends or by following a [source::BackendSource].
//! * Builders are installed in a [scheme::SchemeTable], where connection
//!   layers look up targets such as `list:///svc-a`. A
//!   [builder::StaticBuilder] serves targets which carry their own backends,
//!   such as `static:///10.0.0.1:9000,10.0.0.2:9000`.
//! * Building a target yields a [resolver::Resolver], which publishes alive
//!   backends to a [notifier::Notifier]. Binding a target additionally
//!   re-resolves whenever the connection reports a state transition through
//!   a [connectivity::StateSource].
//! * Liveness is decided by a [probe::Prober]. [probers::tcp::TcpProber]
//!   treats a backend as alive if it accepts a TCP connection.
//!
//! # DTrace probes
//!
//! resorb contains a number of DTrace USDT probes, which fire as backends
//! are health-checked and published. The full list of probes is:
//!
//! - `probe-start`: Fires before health-checking a backend.
//! - `probe-done`: Fires after a backend passes its health check.
//! - `probe-failed`: Fires after a backend fails its health check.
//! - `resolve-start`: Fires when a resolver starts re-checking its backends.
//! - `resolve-unchanged`: Fires when a pass finds the same alive backends
//!   as were last published.
//! - `publish-done`: Fires after a new set of backends is published.
//!
//! The existence of the probes is behind the `"probes"` feature, which is
//! enabled by default. Probes are zero-cost unless they are explicitly enabled,
//! by tracing the program with the `dtrace(1)` command-line tool.
//!
//! Registering the probes is technically fallible, so
//! `builder::ListBuilder::new` and `builder::StaticBuilder::new` are fallible
//! too. The `Err` variant still gives
//! access to the builder, for applications which would rather have an
//! uninstrumented builder than none at all.

// Public API
pub mod address;
pub mod builder;
pub mod connectivity;
pub mod endpoints;
pub mod fingerprint;
pub mod notifier;
pub mod policy;
pub mod probe;
pub mod resolver;
pub mod scheme;
pub mod service;
pub mod source;
pub mod watcher;

// Necessary for implementation
mod jitter;
mod join;
#[cfg(test)]
mod test_utils;

// Default implementations of generic interfaces
pub mod probers;

/// USDT probes for tracing how resorb checks and publishes backends.
#[cfg(feature = "probes")]
#[usdt::provider(provider = "resorb")]
mod probes {
    /// Fires right before health-checking a backend, with its address.
    fn probe__start(addr: &str) {}

    /// Fires after a backend passes its health check.
    fn probe__done(addr: &str) {}

    /// Fires after a backend fails its health check, with a string
    /// identifying the reason.
    fn probe__failed(addr: &str, reason: &str) {}

    /// Fires when a resolver starts re-checking its current backends.
    fn resolve__start(service: &str) {}

    /// Fires when a resolve pass finds nothing to publish.
    fn resolve__unchanged(service: &str) {}

    /// Fires after a new set of backends is handed to a notifier, with the
    /// number of backends in the set.
    fn publish__done(service: &str, count: u64) {}
}
