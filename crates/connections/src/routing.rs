//! Selects how a target is reached from its descriptor

use async_trait::async_trait;
use cryo_core::{ConnectionDescriptor, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::connection::{CloseHandle, Connection};

/// Opens sessions for one family of targets
#[async_trait]
pub trait ConnectionStrategy: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Establish a session; the strategy hands `close_handle` to whatever
    /// observes the transport so the pool learns about remote closes.
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        close_handle: CloseHandle,
    ) -> Result<Arc<dyn Connection>>;
}

/// Maps the URI scheme of a target id to a strategy
///
/// Routing depends on nothing but the descriptor: the same descriptor always
/// reaches the same strategy.
#[derive(Clone)]
pub struct StrategyRouter {
    default: Arc<dyn ConnectionStrategy>,
    by_scheme: HashMap<String, Arc<dyn ConnectionStrategy>>,
}

impl StrategyRouter {
    /// Route every descriptor to `default` until alternates are registered
    pub fn new(default: Arc<dyn ConnectionStrategy>) -> Self {
        Self {
            default,
            by_scheme: HashMap::new(),
        }
    }

    /// Route descriptors whose target id uses `scheme` to `strategy`
    ///
    /// Schemes compare case-insensitively.
    #[must_use]
    pub fn with_scheme(mut self, scheme: &str, strategy: Arc<dyn ConnectionStrategy>) -> Self {
        self.by_scheme.insert(scheme.to_ascii_lowercase(), strategy);
        self
    }

    pub fn route(&self, descriptor: &ConnectionDescriptor) -> &Arc<dyn ConnectionStrategy> {
        descriptor
            .scheme()
            .and_then(|scheme| self.by_scheme.get(&scheme.to_ascii_lowercase()))
            .unwrap_or(&self.default)
    }
}

impl fmt::Debug for StrategyRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<_> = self.by_scheme.keys().collect();
        schemes.sort();
        f.debug_struct("StrategyRouter")
            .field("default", &self.default.name())
            .field("schemes", &schemes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl ConnectionStrategy for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn connect(
            &self,
            descriptor: &ConnectionDescriptor,
            _close_handle: CloseHandle,
        ) -> Result<Arc<dyn Connection>> {
            Err(cryo_core::Error::connection(
                descriptor.target_id(),
                "not a real strategy",
            ))
        }
    }

    fn router() -> StrategyRouter {
        StrategyRouter::new(Arc::new(Named("jmx")))
            .with_scheme("file", Arc::new(Named("directory")))
            .with_scheme("HTTP", Arc::new(Named("agent")))
    }

    #[test]
    fn routes_by_scheme() {
        let router = router();
        let route = |id: &str| router.route(&ConnectionDescriptor::new(id)).name();

        assert_eq!(route("file:///var/recordings"), "directory");
        assert_eq!(route("http://agent:8080"), "agent");
        assert_eq!(route("Http://agent:8080"), "agent");
        assert_eq!(route("service:jmx:rmi:///jndi/rmi://app:9091/jmxrmi"), "jmx");
        assert_eq!(route("app:9091"), "jmx");
        assert_eq!(route("app"), "jmx");
    }

    #[test]
    fn routing_is_stable_for_equal_descriptors() {
        let router = router();
        let a = ConnectionDescriptor::new("file:///a");
        let b = ConnectionDescriptor::new("file:///a");
        assert!(Arc::ptr_eq(router.route(&a), router.route(&b)));
    }
}
