//! Query type to module mapping, built once at startup.

use crate::config::ScanConfig;
use crate::models::QueryType;
use crate::modules::domain::{DomainDnsModule, DomainHttpModule, DomainReputationModule};
use crate::modules::email::{EmailBreachModule, EmailDomainModule, EmailGravatarModule};
use crate::modules::geo::{GeoCoordinatesModule, NominatimModule};
use crate::modules::image::ImageMetadataModule;
use crate::modules::ip::{IpApiModule, IpInfoModule, PortScanModule};
use crate::modules::person::PersonSearchModule;
use crate::modules::phone::{NumverifyModule, PhoneParseModule};
use crate::modules::social::SocialProfileModule;
use crate::modules::username::UsernameSearchModule;
use crate::modules::Module;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no module is registered for {0} queries")]
    Unserved(QueryType),

    #[error("module '{0}' is registered twice")]
    Duplicate(String),
}

/// Static mapping from query type to the modules eligible for it.
pub struct ModuleRegistry {
    by_type: BTreeMap<QueryType, Vec<Arc<dyn Module>>>,
}

impl ModuleRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Every built-in module. The port scanner joins only when active
    /// scanning is enabled.
    pub fn standard(scan: &ScanConfig) -> Result<Self, RegistryError> {
        let mut builder = Self::builder()
            .register(PhoneParseModule)
            .register(NumverifyModule)
            .register(UsernameSearchModule)
            .register(EmailBreachModule)
            .register(EmailGravatarModule)
            .register(EmailDomainModule)
            .register(DomainDnsModule)
            .register(DomainHttpModule)
            .register(DomainReputationModule)
            .register(IpInfoModule)
            .register(IpApiModule)
            .register(PersonSearchModule)
            .register(ImageMetadataModule)
            .register(SocialProfileModule)
            .register(GeoCoordinatesModule)
            .register(NominatimModule);

        if scan.active_ip_scan {
            builder = builder.register(PortScanModule::new(scan.port_connect_timeout()));
        }

        builder.build()
    }

    /// Modules eligible for a query type, in registration order.
    pub fn modules_for(&self, query_type: QueryType) -> &[Arc<dyn Module>] {
        self.by_type
            .get(&query_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn module_names(&self, query_type: QueryType) -> Vec<&'static str> {
        self.modules_for(query_type).iter().map(|m| m.name()).collect()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    modules: Vec<Arc<dyn Module>>,
}

impl RegistryBuilder {
    pub fn register(self, module: impl Module + 'static) -> Self {
        self.register_arc(Arc::new(module))
    }

    pub fn register_arc(mut self, module: Arc<dyn Module>) -> Self {
        self.modules.push(module);
        self
    }

    /// Fails when a name repeats or a query type has no module.
    pub fn build(self) -> Result<ModuleRegistry, RegistryError> {
        let mut names = BTreeSet::new();
        let mut by_type: BTreeMap<QueryType, Vec<Arc<dyn Module>>> = BTreeMap::new();

        for module in self.modules {
            if !names.insert(module.name()) {
                return Err(RegistryError::Duplicate(module.name().to_string()));
            }
            for query_type in module.query_types() {
                by_type.entry(*query_type).or_default().push(module.clone());
            }
        }

        if let Some(unserved) = QueryType::ALL.iter().find(|t| !by_type.contains_key(t)) {
            return Err(RegistryError::Unserved(*unserved));
        }

        debug!("Module registry built with {} modules", names.len());
        Ok(ModuleRegistry { by_type })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ModuleError, PartialResult, Query};
    use crate::modules::ScanContext;
    use async_trait::async_trait;

    struct Stub {
        name: &'static str,
        types: &'static [QueryType],
    }

    #[async_trait]
    impl Module for Stub {
        fn name(&self) -> &'static str {
            self.name
        }

        fn query_types(&self) -> &'static [QueryType] {
            self.types
        }

        async fn investigate(&self, _: &Query, _: &ScanContext) -> Result<PartialResult, ModuleError> {
            Ok(PartialResult::new(self.name, 1.0))
        }
    }

    #[test]
    fn test_unserved_type_fails_fast() {
        let result = ModuleRegistry::builder()
            .register(Stub { name: "phone", types: &[QueryType::Phone] })
            .build();

        assert_eq!(result.err(), Some(RegistryError::Unserved(QueryType::Username)));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let result = ModuleRegistry::builder()
            .register(Stub { name: "all", types: &QueryType::ALL })
            .register(Stub { name: "all", types: &[QueryType::Ip] })
            .build();

        assert_eq!(result.err(), Some(RegistryError::Duplicate("all".into())));
    }

    #[test]
    fn test_modules_in_registration_order() {
        let registry = ModuleRegistry::builder()
            .register(Stub { name: "zeta", types: &QueryType::ALL })
            .register(Stub { name: "alpha", types: &[QueryType::Email] })
            .build()
            .unwrap();

        assert_eq!(registry.module_names(QueryType::Email), vec!["zeta", "alpha"]);
        assert_eq!(registry.module_names(QueryType::Geo), vec!["zeta"]);
    }

    #[test]
    fn test_standard_registry() {
        let registry = ModuleRegistry::standard(&ScanConfig::default()).unwrap();

        assert_eq!(
            registry.module_names(QueryType::Email),
            vec!["email_breach", "email_gravatar", "email_domain"]
        );
        assert_eq!(registry.module_names(QueryType::Ip), vec!["ipinfo", "ip_api"]);
        for query_type in QueryType::ALL {
            assert!(!registry.modules_for(query_type).is_empty());
        }
    }

    #[test]
    fn test_standard_registry_with_active_scan() {
        let scan = ScanConfig {
            active_ip_scan: true,
            ..ScanConfig::default()
        };
        let registry = ModuleRegistry::standard(&scan).unwrap();

        assert_eq!(
            registry.module_names(QueryType::Ip),
            vec!["ipinfo", "ip_api", "port_scan"]
        );
    }
}
