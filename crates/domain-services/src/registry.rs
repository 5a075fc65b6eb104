// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Service registry for domain route providers
//!
//! The registry is the explicit dependency container the gateway is built
//! from. It owns one provider per domain and hands them to the router
//! registry in a stable order.

use std::{collections::BTreeMap, sync::Arc};

use route_provider::RouteProvider;
use shared_types::Domain;
use tracing::debug;

use crate::DomainService;

/// Registry holding the route provider for each business domain
#[derive(Debug, Default, Clone)]
pub struct ServiceRegistry {
    providers: BTreeMap<Domain, Arc<dyn RouteProvider>>,
}

impl ServiceRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in provider of every domain
    pub fn with_default_services() -> Self {
        let providers = Domain::all()
            .iter()
            .map(|&domain| {
                let provider: Arc<dyn RouteProvider> = Arc::new(DomainService::for_domain(domain));
                (domain, provider)
            })
            .collect();

        Self { providers }
    }

    /// Replace the provider of a domain, registering it if absent
    #[must_use]
    pub fn with_provider(mut self, domain: Domain, provider: Arc<dyn RouteProvider>) -> Self {
        debug!(domain = %domain, provider = provider.name(), "overriding route provider");
        self.providers.insert(domain, provider);
        self
    }

    /// Provider registered for a domain
    pub fn get(&self, domain: Domain) -> Option<&Arc<dyn RouteProvider>> {
        self.providers.get(&domain)
    }

    /// Registered providers in domain order
    pub fn iter(&self) -> impl Iterator<Item = (Domain, &Arc<dyn RouteProvider>)> {
        self.providers.iter().map(|(domain, provider)| (*domain, provider))
    }

    /// Domains that have a provider
    pub fn domains(&self) -> impl Iterator<Item = Domain> + '_ {
        self.providers.keys().copied()
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no provider is registered
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
