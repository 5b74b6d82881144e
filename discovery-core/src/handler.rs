//! The external interfaces consumed by the Engine and the Plugin Framework:
//! the handler contract every protocol implementation satisfies, and the
//! superset contract a hot-loadable plugin implements.

use std::collections::HashMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::job::DiscoveryResult;

/// Implemented by every protocol handler (mDNS, SSDP, SNMP, network scan,
/// or a third-party plugin). `discover` never returns `Err` — failures are
/// carried on [`DiscoveryResult::success`]/`error` instead; a handler never
/// raises, it translates internal errors into a failed result.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DiscoveryHandler: Send + Sync {
    /// Run one discovery pass. `params` is the job's/protocol's open-schema
    /// parameter map.
    async fn discover(&self, params: &HashMap<String, serde_json::Value>) -> DiscoveryResult;

    /// Cheap, side-effect-light availability probe. Must not block for long.
    async fn available(&self) -> bool;

    fn name(&self) -> &str;
}

/// The superset interface a hot-loadable plugin implements: lifecycle hooks plus the handler contract.
#[async_trait]
pub trait Plugin: Send + Sync {
    async fn initialize(&mut self) -> crate::error::Result<()>;

    async fn discover(&self, params: &HashMap<String, serde_json::Value>) -> DiscoveryResult;

    async fn cleanup(&mut self) -> crate::error::Result<()>;

    /// Accumulates every configuration problem rather than failing fast.
    fn validate_config(&self) -> Vec<String>;

    fn supported_protocols(&self) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_handler_satisfies_the_trait_object_bound() {
        let mut mock = MockDiscoveryHandler::new();
        mock.expect_name().return_const("mock".to_string());
        mock.expect_available().returning(|| true);
        mock.expect_discover()
            .returning(|_| DiscoveryResult::ok("mock", vec![], 0.0));

        let handler: Box<dyn DiscoveryHandler> = Box::new(mock);
        assert_eq!(handler.name(), "mock");
        assert!(handler.available().await);
        let result = handler.discover(&HashMap::new()).await;
        assert!(result.success);
    }
}
