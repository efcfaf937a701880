//! Builders, which construct [Resolver]s for the services they know about.
//!
//! A builder serves one scheme. The [ListBuilder] keeps its backend lists in
//! a shared [EndpointRegistry], tracks every resolver it has built, and fans
//! updates out to all resolvers of the updated service.

use crate::address::Address;
use crate::endpoints::EndpointRegistry;
use crate::notifier::SharedNotifier;
use crate::policy::Policy;
use crate::probe::{self, SharedProber};
use crate::resolver::{self, ErrorChannel, ErrorSink, ErrorStream, ResolveError, Resolver};
use crate::scheme::{Error, Target};
use crate::service;
use crate::source::{SharedBackendSource, Subscription};

use async_trait::async_trait;
use debug_ignore::DebugIgnore;
use rand::{rng, Rng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{event, instrument, Level};

/// Scheme for services whose backends are supplied directly by the host.
pub const LIST_SCHEME: &str = "list";

/// Scheme for services whose backends come from a [crate::source::BackendSource].
pub const SOURCE_SCHEME: &str = "source";

/// Scheme for targets which carry their own backends, as in
/// `static:///10.0.0.1:9000,10.0.0.2:9000`.
pub const STATIC_SCHEME: &str = "static";

const ID_LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ID_LENGTH: usize = 9;

/// Constructs resolvers for targets of one scheme.
#[async_trait]
pub trait Builder: Send + Sync {
    /// The scheme this builder serves, e.g. "list".
    fn scheme(&self) -> &str;

    /// Builds a resolver for `service`, bound to `notifier`.
    ///
    /// Each call returns a new resolver, even for a service which already
    /// has resolvers.
    async fn build(
        &self,
        service: &service::Name,
        notifier: SharedNotifier,
    ) -> Result<Resolver, Error>;

    /// The policy applied to resolvers built by this builder.
    fn policy(&self) -> Policy {
        Policy::default()
    }
}

pub type SharedBuilder = Arc<dyn Builder>;

#[derive(Debug)]
struct BuilderInner {
    scheme: String,
    endpoints: Arc<EndpointRegistry>,
    prober: DebugIgnore<SharedProber>,
    policy: Policy,

    // Every resolver built for each service which hasn't been closed yet.
    resolvers: Mutex<HashMap<service::Name, Vec<Resolver>>>,

    // Error streams of registrations, which see errors from all resolvers
    // of their service.
    registrations: Mutex<HashMap<service::Name, ErrorSink>>,

    // Held across "store, probe, apply" for one service, and while seeding a
    // new resolver, so updates reach resolvers in the order they were stored.
    updates: Mutex<HashMap<service::Name, Arc<tokio::sync::Mutex<()>>>>,
}

/// A [Builder] for services with explicitly supplied backend lists.
///
/// The same type serves both [LIST_SCHEME] and [SOURCE_SCHEME]; the only
/// difference is where updates come from.
#[derive(Clone, Debug)]
pub struct ListBuilder {
    inner: Arc<BuilderInner>,
}

/// Errors returned from [ListBuilder::new] and [StaticBuilder::new] when USDT
/// probes could not be registered.
///
/// The builder is still usable, just not instrumented; use
/// [RegistrationError::into_inner] to get it anyway.
pub struct RegistrationError<B = ListBuilder>(B);

impl<B> std::fmt::Debug for RegistrationError<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationError").finish_non_exhaustive()
    }
}

impl<B> std::fmt::Display for RegistrationError<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        "USDT probe registration failed".fmt(f)
    }
}

impl<B> std::error::Error for RegistrationError<B> {}

impl<B> RegistrationError<B> {
    /// Consume the error and get access to the contained builder.
    pub fn into_inner(self) -> B {
        self.0
    }
}

fn register_probes<B>(builder: B) -> Result<B, RegistrationError<B>> {
    #[cfg(feature = "probes")]
    match usdt::register_probes() {
        Ok(_) => Ok(builder),
        Err(_) => Err(RegistrationError(builder)),
    }
    #[cfg(not(feature = "probes"))]
    Ok(builder)
}

impl ListBuilder {
    /// Creates a builder for `scheme`.
    ///
    /// - endpoints: Where backend lists are stored. Builders sharing this
    ///   registry see each other's services.
    /// - prober: How backends are checked for liveness.
    /// - policy: Configuration for resolvers made by this builder.
    ///
    /// ```no_run
    /// use resorb::builder::{ListBuilder, LIST_SCHEME};
    /// use resorb::endpoints::EndpointRegistry;
    /// use resorb::notifier::WatchNotifier;
    /// use resorb::policy::Policy;
    /// use resorb::probers::tcp::TcpProber;
    /// use resorb::scheme::SchemeTable;
    /// use std::sync::Arc;
    ///
    /// # async {
    /// let endpoints = Arc::new(EndpointRegistry::new());
    /// let builder = ListBuilder::new(
    ///     LIST_SCHEME,
    ///     endpoints,
    ///     Arc::new(TcpProber {}),
    ///     Policy::default(),
    /// ).unwrap();
    ///
    /// // Register a service, then resolve it through its target.
    /// let registration = builder.register(vec!["10.0.0.1:9000".into()]);
    /// let mut schemes = SchemeTable::new();
    /// schemes.register_scheme(Arc::new(builder));
    ///
    /// let notifier = Arc::new(WatchNotifier::new());
    /// let resolver = schemes.build(&registration.target(), notifier).await.unwrap();
    /// # };
    /// ```
    #[instrument(skip(endpoints, prober), name = "ListBuilder::new")]
    pub fn new(
        scheme: impl ToString + std::fmt::Debug,
        endpoints: Arc<EndpointRegistry>,
        prober: SharedProber,
        policy: Policy,
    ) -> Result<Self, RegistrationError> {
        let self_ = Self {
            inner: Arc::new(BuilderInner {
                scheme: scheme.to_string(),
                endpoints,
                prober: DebugIgnore(prober),
                policy,
                resolvers: Mutex::new(HashMap::new()),
                registrations: Mutex::new(HashMap::new()),
                updates: Mutex::new(HashMap::new()),
            }),
        };
        register_probes(self_)
    }

    pub fn endpoints(&self) -> &Arc<EndpointRegistry> {
        &self.inner.endpoints
    }

    /// Registers `initial` under a freshly generated service name.
    pub fn register(&self, initial: Vec<Address>) -> Registration {
        let mut initial = Some(initial);
        loop {
            let service = random_name();
            if let Some(registration) = self.try_register(&service, &mut initial) {
                return registration;
            }
            event!(Level::DEBUG, %service, "Generated service name collided");
        }
    }

    /// Registers `initial` under `service`.
    ///
    /// Fails if the name is invalid or already registered.
    pub fn register_named(
        &self,
        service: impl ToString,
        initial: Vec<Address>,
    ) -> Result<Registration, Error> {
        let service = service::Name::parse(service)?;
        let mut initial = Some(initial);
        self.try_register(&service, &mut initial)
            .ok_or(Error::AlreadyRegistered(service))
    }

    /// Registers `service`, taking its backends from `source`.
    ///
    /// The initial list is queried before returning; if that fails, nothing
    /// is registered. Afterwards, every update emitted by the source is
    /// applied as if passed to [Registration::update_backends], until the
    /// registration is deregistered or dropped.
    pub async fn register_from_source(
        &self,
        service: impl ToString,
        source: SharedBackendSource,
    ) -> Result<Registration, Error> {
        let service = service::Name::parse(service)?;
        let initial = source
            .query_initial(&service)
            .await
            .map_err(Error::Source)?;
        let mut initial = Some(initial);
        let mut registration = self
            .try_register(&service, &mut initial)
            .ok_or_else(|| Error::AlreadyRegistered(service.clone()))?;
        registration.subscription = Some(Subscription::spawn(
            self.clone(),
            service.clone(),
            source.watch_changes(&service),
        ));
        Ok(registration)
    }

    // Registers `service` if it's new, consuming `initial` on success.
    fn try_register(
        &self,
        service: &service::Name,
        initial: &mut Option<Vec<Address>>,
    ) -> Option<Registration> {
        let backends = initial.take().unwrap_or_default();
        if !self.inner.endpoints.insert_new(service, backends.clone()) {
            *initial = Some(backends);
            return None;
        }
        let errors = ErrorChannel::new(self.inner.policy.error_capacity);
        self.inner
            .registrations
            .lock()
            .unwrap()
            .insert(service.clone(), errors.sink().clone());
        event!(Level::INFO, %service, scheme = %self.inner.scheme, "Registered service");
        Some(Registration {
            service: service.clone(),
            builder: self.clone(),
            errors,
            subscription: None,
        })
    }

    /// Returns the resolvers currently open for `service`.
    pub fn resolvers(&self, service: &service::Name) -> Vec<Resolver> {
        let mut resolvers = self.inner.resolvers.lock().unwrap();
        let Some(list) = resolvers.get_mut(service) else {
            return vec![];
        };
        list.retain(|resolver| !resolver.is_closed());
        let live = list.clone();
        if list.is_empty() {
            resolvers.remove(service);
        }
        live
    }

    fn update_lock(&self, service: &service::Name) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .updates
            .lock()
            .unwrap()
            .entry(service.clone())
            .or_default()
            .clone()
    }

    /// Replaces the backends of `service`, and applies them to every open
    /// resolver of that service.
    ///
    /// The new list is probed once, and the result shared by all resolvers.
    /// The returned error names the addresses which failed; it is sent once
    /// to the registration's error stream, and to each resolver's own stream.
    ///
    /// Updates of one service are applied one at a time, in the order they
    /// are stored, so resolvers always end up with the latest list.
    #[instrument(skip(self, backends), fields(scheme = %self.inner.scheme))]
    pub async fn update(
        &self,
        service: &service::Name,
        backends: Vec<Address>,
    ) -> Result<(), ResolveError> {
        let lock = self.update_lock(service);
        let _guard = lock.lock().await;
        self.inner.endpoints.set(service, backends.clone());

        let backends = resolver::dedup(backends);
        let partition = probe::probe_all(
            &**self.inner.prober,
            &backends,
            self.inner.policy.probe_timeout,
            self.inner.policy.probe_concurrency,
        )
        .await;

        let err = ResolveError::from_partition(service, &partition);
        if let Some(err) = &err {
            if let Some(sink) = self.inner.registrations.lock().unwrap().get(service) {
                sink.report(err);
            }
        }
        for resolver in self.resolvers(service) {
            let _ = resolver.apply_probed(partition.clone()).await;
        }

        match err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Forgets `service` and closes all of its resolvers.
    #[instrument(skip(self), fields(scheme = %self.inner.scheme))]
    pub fn deregister(&self, service: &service::Name) {
        self.inner.endpoints.remove(service);
        self.inner.registrations.lock().unwrap().remove(service);
        self.inner.updates.lock().unwrap().remove(service);
        let resolvers = self
            .inner
            .resolvers
            .lock()
            .unwrap()
            .remove(service)
            .unwrap_or_default();
        for resolver in resolvers {
            resolver.close();
        }
        event!(Level::INFO, "Deregistered service");
    }
}

#[async_trait]
impl Builder for ListBuilder {
    fn scheme(&self) -> &str {
        &self.inner.scheme
    }

    #[instrument(skip(self, notifier), name = "ListBuilder::build", err)]
    async fn build(
        &self,
        service: &service::Name,
        notifier: SharedNotifier,
    ) -> Result<Resolver, Error> {
        if !self.inner.endpoints.contains(service) {
            return Err(Error::UnknownService(service.clone()));
        }
        // No update may slip in between reading the list and seeding.
        let lock = self.update_lock(service);
        let _guard = lock.lock().await;
        let forward = self
            .inner
            .registrations
            .lock()
            .unwrap()
            .get(service)
            .cloned();
        let resolver = Resolver::with_forwarding(
            service.clone(),
            self.inner.prober.0.clone(),
            notifier,
            self.inner.policy.clone(),
            forward,
        );
        self.inner
            .resolvers
            .lock()
            .unwrap()
            .entry(service.clone())
            .or_default()
            .push(resolver.clone());

        // Seed from the current list. Failures here are reported through
        // the error streams; they don't make the build fail.
        let backends = self.inner.endpoints.get(service);
        let _ = resolver.update_backends(backends).await;
        Ok(resolver)
    }

    fn policy(&self) -> Policy {
        self.inner.policy.clone()
    }
}

/// A [Builder] for targets which name their backends directly.
///
/// Nothing is registered up front: the endpoint of the target is the
/// comma-separated list of addresses, optionally in brackets. Each resolver
/// still health-checks its list. Since nothing can update such a list, the
/// resolvers are not tracked.
#[derive(Clone, Debug)]
pub struct StaticBuilder {
    prober: DebugIgnore<SharedProber>,
    policy: Policy,
}

impl StaticBuilder {
    pub fn new(
        prober: SharedProber,
        policy: Policy,
    ) -> Result<Self, RegistrationError<StaticBuilder>> {
        register_probes(Self {
            prober: DebugIgnore(prober),
            policy,
        })
    }

    /// Returns the target which resolves to `addresses`.
    ///
    /// Fails if the list is empty, or an address contains '/' or whitespace.
    pub fn target(addresses: &[Address]) -> Result<Target, Error> {
        let endpoint = addresses
            .iter()
            .map(|address| address.as_str())
            .collect::<Vec<_>>()
            .join(",");
        Ok(Target::new(STATIC_SCHEME, service::Name::parse(endpoint)?))
    }

    fn parse_endpoint(endpoint: &service::Name) -> Result<Vec<Address>, Error> {
        let list = endpoint
            .as_str()
            .trim_start_matches('[')
            .trim_end_matches(']');
        list.split(',')
            .map(|address| match address {
                "" => Err(Error::MalformedTarget(
                    Target::new(STATIC_SCHEME, endpoint.clone()).to_string(),
                )),
                address => Ok(Address::new(address)),
            })
            .collect()
    }
}

#[async_trait]
impl Builder for StaticBuilder {
    fn scheme(&self) -> &str {
        STATIC_SCHEME
    }

    #[instrument(skip(self, notifier), name = "StaticBuilder::build", err)]
    async fn build(
        &self,
        service: &service::Name,
        notifier: SharedNotifier,
    ) -> Result<Resolver, Error> {
        let backends = Self::parse_endpoint(service)?;
        let resolver = Resolver::new(
            service.clone(),
            self.prober.0.clone(),
            notifier,
            self.policy.clone(),
        );
        let _ = resolver.update_backends(backends).await;
        Ok(resolver)
    }

    fn policy(&self) -> Policy {
        self.policy.clone()
    }
}

fn random_name() -> service::Name {
    let mut rng = rng();
    let name: String = (0..ID_LENGTH)
        .map(|_| ID_LETTERS[rng.random_range(0..ID_LETTERS.len())] as char)
        .collect();
    service::Name::from(name)
}

/// A host's handle on one registered service.
///
/// Dropping a registration stops following its backend source (if any), but
/// leaves the service registered; use [Registration::deregister] to remove
/// it.
#[derive(Debug)]
pub struct Registration {
    service: service::Name,
    builder: ListBuilder,
    errors: ErrorChannel,
    subscription: Option<Subscription>,
}

impl Registration {
    pub fn service(&self) -> &service::Name {
        &self.service
    }

    /// The target under which connections can resolve this service.
    pub fn target(&self) -> Target {
        Target::new(self.builder.scheme(), self.service.clone())
    }

    /// Replaces the backends of this service. See [ListBuilder::update].
    pub async fn update_backends(&self, backends: Vec<Address>) -> Result<(), ResolveError> {
        self.builder.update(&self.service, backends).await
    }

    /// Takes the stream of health-check failures from every resolver of
    /// this service.
    ///
    /// Can be taken once; later calls return `None`.
    pub fn errors(&self) -> Option<ErrorStream> {
        self.errors.take_stream()
    }

    /// Removes the service, closing all of its resolvers.
    pub async fn deregister(mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.terminate().await;
        }
        self.builder.deregister(&self.service);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::address::addresses;
    use crate::test_utils::{setup_tracing_subscriber, RecordingNotifier, ScriptedProber};
    use futures::StreamExt;
    use std::time::Duration;

    fn builder(prober: &Arc<ScriptedProber>) -> ListBuilder {
        ListBuilder::new(
            LIST_SCHEME,
            Arc::new(EndpointRegistry::new()),
            prober.clone(),
            Policy::default(),
        )
        .unwrap_or_else(|err| err.into_inner())
    }

    #[tokio::test]
    async fn registered_service_publishes_alive_backends() {
        setup_tracing_subscriber();
        let prober = Arc::new(ScriptedProber::new());
        prober.set_down("10.0.0.2:9000");
        let builder = builder(&prober);

        let registration = builder
            .register_named("svc-a", addresses(["10.0.0.1:9000", "10.0.0.2:9000"]))
            .unwrap();
        let mut errors = registration.errors().unwrap();
        assert_eq!(registration.target().to_string(), "list:///svc-a");

        let notifier = Arc::new(RecordingNotifier::new());
        let resolver = builder
            .build(registration.service(), notifier.clone())
            .await
            .unwrap();
        assert_eq!(notifier.publishes(), vec![addresses(["10.0.0.1:9000"])]);

        let err = errors.next().await.unwrap();
        assert_eq!(err.failed(), addresses(["10.0.0.2:9000"]));
        assert!(err.to_string().contains("10.0.0.2:9000"));

        // Exactly one publish, and one error
        assert_eq!(resolver.resolve_now().await, resolver::Resolution::Unchanged);
        assert_eq!(notifier.count(), 1);
        let more = tokio::time::timeout(Duration::from_millis(10), errors.next()).await;
        assert!(more.is_err());
    }

    #[tokio::test]
    async fn unknown_service_fails_to_build() {
        let prober = Arc::new(ScriptedProber::new());
        let builder = builder(&prober);
        let err = builder
            .build(
                &service::Name::new("nope"),
                Arc::new(RecordingNotifier::new()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownService(_)));
    }

    #[tokio::test]
    async fn registration_names() {
        let prober = Arc::new(ScriptedProber::new());
        let builder = builder(&prober);

        let generated = builder.register(vec![]);
        assert_eq!(generated.service().as_str().len(), ID_LENGTH);
        assert!(generated
            .service()
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphabetic()));

        builder.register_named("svc-a", vec![]).unwrap();
        assert!(matches!(
            builder.register_named("svc-a", vec![]),
            Err(Error::AlreadyRegistered(_))
        ));
        assert!(matches!(
            builder.register_named("", vec![]),
            Err(Error::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn updates_fan_out_to_every_resolver() {
        let prober = Arc::new(ScriptedProber::new());
        let builder = builder(&prober);
        let registration = builder
            .register_named("svc-a", addresses(["10.0.0.1:9000"]))
            .unwrap();

        let n1 = Arc::new(RecordingNotifier::new());
        let n2 = Arc::new(RecordingNotifier::new());
        let r1 = builder.build(registration.service(), n1.clone()).await.unwrap();
        let r2 = builder.build(registration.service(), n2.clone()).await.unwrap();
        assert_ne!(r1.id(), r2.id());
        assert_eq!(builder.resolvers(registration.service()).len(), 2);

        prober.set_down("10.0.0.3:9000");
        let probes = prober.probe_count();
        let err = registration
            .update_backends(addresses(["10.0.0.2:9000", "10.0.0.3:9000"]))
            .await
            .unwrap_err();
        assert_eq!(err.failed(), addresses(["10.0.0.3:9000"]));
        // One probe pass, shared by both resolvers
        assert_eq!(prober.probe_count(), probes + 2);

        for notifier in [&n1, &n2] {
            assert_eq!(notifier.count(), 2);
            assert_eq!(notifier.last(), Some(addresses(["10.0.0.2:9000"])));
        }
        // The registry keeps the raw list
        assert_eq!(
            builder.endpoints().get(registration.service()),
            addresses(["10.0.0.2:9000", "10.0.0.3:9000"])
        );

        // Same content again: no publishes
        registration
            .update_backends(addresses(["10.0.0.2:9000"]))
            .await
            .unwrap();
        assert_eq!(n1.count(), 2);
        assert_eq!(n2.count(), 2);

        // Closed resolvers stop receiving updates
        r1.close();
        assert_eq!(builder.resolvers(registration.service()).len(), 1);
        registration
            .update_backends(addresses(["10.0.0.1:9000"]))
            .await
            .unwrap();
        assert_eq!(n1.count(), 2);
        assert_eq!(n2.count(), 3);
    }

    #[tokio::test]
    async fn update_without_resolvers_still_reports() {
        let prober = Arc::new(ScriptedProber::new());
        prober.set_down("10.0.0.2:9000");
        let builder = builder(&prober);
        let registration = builder.register(vec![]);
        let mut errors = registration.errors().unwrap();

        let err = registration
            .update_backends(addresses(["10.0.0.1:9000", "10.0.0.2:9000"]))
            .await
            .unwrap_err();
        assert_eq!(errors.next().await, Some(err));
    }

    #[tokio::test]
    async fn racing_updates_keep_the_latest_list() {
        let prober = Arc::new(ScriptedProber::new());
        prober.set_delay("10.0.0.1:9000", Duration::from_millis(50));
        let builder = builder(&prober);
        let registration = builder.register_named("svc-a", vec![]).unwrap();
        let service = registration.service().clone();
        let notifier = Arc::new(RecordingNotifier::new());
        let resolver = builder.build(&service, notifier.clone()).await.unwrap();

        // The slow list is stored first, the fast one second.
        let slow = tokio::spawn({
            let builder = builder.clone();
            let service = service.clone();
            async move { builder.update(&service, addresses(["10.0.0.1:9000"])).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        registration
            .update_backends(addresses(["10.0.0.2:9000"]))
            .await
            .unwrap();
        slow.await.unwrap().unwrap();

        assert_eq!(builder.endpoints().get(&service), addresses(["10.0.0.2:9000"]));
        assert_eq!(resolver.backends().await, addresses(["10.0.0.2:9000"]));
        assert_eq!(notifier.last(), Some(addresses(["10.0.0.2:9000"])));
        assert_eq!(resolver.resolve_now().await, resolver::Resolution::Unchanged);
    }

    #[tokio::test]
    async fn update_during_resolve_pass_is_applied_after_it() {
        let prober = Arc::new(ScriptedProber::new());
        let builder = builder(&prober);
        let registration = builder
            .register_named("svc-a", addresses(["10.0.0.1:9000"]))
            .unwrap();
        let notifier = Arc::new(RecordingNotifier::new());
        let resolver = builder
            .build(registration.service(), notifier.clone())
            .await
            .unwrap();

        prober.set_delay("10.0.0.1:9000", Duration::from_millis(50));
        let pass = tokio::spawn({
            let resolver = resolver.clone();
            async move { resolver.resolve_now().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        registration
            .update_backends(addresses(["10.0.0.2:9000"]))
            .await
            .unwrap();

        assert_eq!(pass.await.unwrap(), resolver::Resolution::Unchanged);
        assert_eq!(resolver.backends().await, addresses(["10.0.0.2:9000"]));
        assert_eq!(
            notifier.publishes(),
            vec![addresses(["10.0.0.1:9000"]), addresses(["10.0.0.2:9000"])]
        );
    }

    #[tokio::test]
    async fn one_registration_error_per_update() {
        let prober = Arc::new(ScriptedProber::new());
        prober.set_down("10.0.0.2:9000");
        let builder = builder(&prober);
        let registration = builder
            .register_named("svc-a", addresses(["10.0.0.1:9000"]))
            .unwrap();
        let mut errors = registration.errors().unwrap();
        let r1 = builder
            .build(registration.service(), Arc::new(RecordingNotifier::new()))
            .await
            .unwrap();
        let r2 = builder
            .build(registration.service(), Arc::new(RecordingNotifier::new()))
            .await
            .unwrap();
        let mut r1_errors = r1.errors().unwrap();
        let mut r2_errors = r2.errors().unwrap();

        let err = registration
            .update_backends(addresses(["10.0.0.1:9000", "10.0.0.2:9000"]))
            .await
            .unwrap_err();
        assert_eq!(errors.next().await, Some(err.clone()));
        let more = tokio::time::timeout(Duration::from_millis(10), errors.next()).await;
        assert!(more.is_err());

        // Each resolver still sees the failure on its own stream
        assert_eq!(r1_errors.next().await, Some(err.clone()));
        assert_eq!(r2_errors.next().await, Some(err));
    }

    #[tokio::test]
    async fn static_targets_carry_their_backends() {
        let prober = Arc::new(ScriptedProber::new());
        prober.set_down("10.0.0.2:9000");
        let builder = StaticBuilder::new(prober.clone(), Policy::default())
            .unwrap_or_else(|err| err.into_inner());

        let target =
            StaticBuilder::target(&addresses(["10.0.0.1:9000", "10.0.0.2:9000"])).unwrap();
        assert_eq!(target.to_string(), "static:///10.0.0.1:9000,10.0.0.2:9000");
        let target = Target::parse(&target.to_string()).unwrap();

        let notifier = Arc::new(RecordingNotifier::new());
        let resolver = builder
            .build(&target.endpoint, notifier.clone())
            .await
            .unwrap();
        assert_eq!(notifier.publishes(), vec![addresses(["10.0.0.1:9000"])]);
        assert_eq!(resolver.backends().await, addresses(["10.0.0.1:9000"]));

        // Bracketed lists work too
        let resolver = builder
            .build(&service::Name::new("[10.0.0.3:9000]"), notifier.clone())
            .await
            .unwrap();
        assert_eq!(resolver.backends().await, addresses(["10.0.0.3:9000"]));

        assert!(matches!(
            builder
                .build(&service::Name::new("10.0.0.1:9000,,10.0.0.3:9000"), notifier)
                .await,
            Err(Error::MalformedTarget(_))
        ));
        assert!(matches!(
            StaticBuilder::target(&[]),
            Err(Error::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn deregister_closes_resolvers() {
        let prober = Arc::new(ScriptedProber::new());
        let builder = builder(&prober);
        let registration = builder
            .register_named("svc-a", addresses(["10.0.0.1:9000"]))
            .unwrap();
        let service = registration.service().clone();
        let resolver = builder
            .build(&service, Arc::new(RecordingNotifier::new()))
            .await
            .unwrap();

        registration.deregister().await;
        assert!(resolver.is_closed());
        assert!(!builder.endpoints().contains(&service));
        assert!(builder.resolvers(&service).is_empty());
        assert!(matches!(
            builder
                .build(&service, Arc::new(RecordingNotifier::new()))
                .await,
            Err(Error::UnknownService(_))
        ));

        // The name is free again
        builder.register_named("svc-a", vec![]).unwrap();
    }
}
