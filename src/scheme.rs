//! Targets, and the table mapping their schemes to builders.

use crate::builder::SharedBuilder;
use crate::connectivity::SharedStateSource;
use crate::notifier::SharedNotifier;
use crate::resolver::Resolver;
use crate::service;
use crate::watcher::Watcher;

use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;
use tracing::{event, Level};

#[derive(Error, Debug)]
pub enum Error {
    #[error("No builder registered for scheme {0:?}")]
    UnknownScheme(String),

    #[error("Malformed target {0:?}, expected scheme://[authority]/endpoint")]
    MalformedTarget(String),

    #[error("Service {0} is not registered")]
    UnknownService(service::Name),

    #[error("Service {0} is already registered")]
    AlreadyRegistered(service::Name),

    #[error(transparent)]
    InvalidName(#[from] service::InvalidName),

    #[error("Failed to query backend source")]
    Source(#[source] anyhow::Error),
}

/// A parsed target string, `scheme://authority/endpoint`.
///
/// The authority is usually empty, as in `list:///svc-a`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Target {
    pub scheme: String,
    pub authority: String,
    pub endpoint: service::Name,
}

impl Target {
    /// Creates a target with an empty authority.
    pub fn new(scheme: impl ToString, endpoint: service::Name) -> Self {
        Self {
            scheme: scheme.to_string(),
            authority: String::new(),
            endpoint,
        }
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        let malformed = || Error::MalformedTarget(s.to_string());
        let (scheme, rest) = s.split_once("://").ok_or_else(malformed)?;
        if scheme.is_empty() {
            return Err(malformed());
        }
        let (authority, endpoint) = rest.split_once('/').ok_or_else(malformed)?;
        let endpoint = service::Name::parse(endpoint).map_err(|_| malformed())?;
        Ok(Self {
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            endpoint,
        })
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.authority, self.endpoint)
    }
}

/// Maps schemes to the [crate::builder::Builder]s which serve them.
///
/// Connection layers look up targets here; hosts register one builder per
/// scheme they support.
#[derive(Clone, Default)]
pub struct SchemeTable {
    builders: BTreeMap<String, SharedBuilder>,
}

impl SchemeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `builder` under its scheme, returning any builder it
    /// replaced.
    pub fn register_scheme(&mut self, builder: SharedBuilder) -> Option<SharedBuilder> {
        let scheme = builder.scheme().to_string();
        event!(Level::DEBUG, %scheme, "Registering scheme");
        self.builders.insert(scheme, builder)
    }

    pub fn get(&self, scheme: &str) -> Option<&SharedBuilder> {
        self.builders.get(scheme)
    }

    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(|scheme| scheme.as_str())
    }

    /// Builds a resolver for `target`.
    pub async fn build(&self, target: &Target, notifier: SharedNotifier) -> Result<Resolver, Error> {
        let builder = self
            .get(&target.scheme)
            .ok_or_else(|| Error::UnknownScheme(target.scheme.clone()))?;
        builder.build(&target.endpoint, notifier).await
    }

    /// Builds a resolver for `target`, and re-resolves it whenever `state`
    /// reports a connection transition.
    pub async fn bind(
        &self,
        target: &Target,
        notifier: SharedNotifier,
        state: SharedStateSource,
    ) -> Result<Binding, Error> {
        let builder = self
            .get(&target.scheme)
            .ok_or_else(|| Error::UnknownScheme(target.scheme.clone()))?;
        let resolver = builder.build(&target.endpoint, notifier).await?;
        let watcher = Watcher::spawn(resolver.clone(), state, &builder.policy());
        Ok(Binding { resolver, watcher })
    }
}

/// A resolver bound to one connection.
pub struct Binding {
    resolver: Resolver,
    watcher: Watcher,
}

impl Binding {
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Closes the resolver and stops watching the connection.
    ///
    /// Dropping the binding closes the resolver too, but does not wait for
    /// the watcher to stop.
    pub async fn close(mut self) {
        self.resolver.close();
        self.watcher.terminate().await;
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.resolver.close();
    }
}
