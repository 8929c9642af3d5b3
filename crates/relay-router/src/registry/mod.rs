//! Endpoint registry - the fixed table of provider endpoints

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use relay_llm::Endpoint;

use crate::config::ConfigError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("Endpoint not found: {0}")]
    NotFound(String),
}

/// Immutable set of endpoints, built once at startup.
///
/// Every endpoint stays enumerable for diagnostics; only those that passed
/// activation (credential present and well formed, valid URL) are active.
#[derive(Debug)]
pub struct EndpointRegistry {
    endpoints: Vec<Arc<Endpoint>>,
    by_name: HashMap<String, usize>,
    /// Activation result per endpoint; `Ok` means active
    activation: HashMap<String, Result<(), ConfigError>>,
}

impl EndpointRegistry {
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self, ConfigError> {
        let mut endpoints: Vec<Arc<Endpoint>> = endpoints.into_iter().map(Arc::new).collect();
        endpoints.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));

        let mut by_name = HashMap::with_capacity(endpoints.len());
        let mut activation = HashMap::with_capacity(endpoints.len());

        for (i, endpoint) in endpoints.iter().enumerate() {
            if by_name.insert(endpoint.name.clone(), i).is_some() {
                return Err(ConfigError::DuplicateEndpoint(endpoint.name.clone()));
            }

            let result = activate(endpoint);
            match &result {
                Ok(()) => tracing::info!(
                    endpoint = %endpoint.name,
                    model = %endpoint.default_model,
                    priority = endpoint.priority,
                    "Endpoint active"
                ),
                Err(ConfigError::MissingCredential(_)) => tracing::debug!(
                    endpoint = %endpoint.name,
                    "Endpoint disabled - no credential"
                ),
                Err(e) => tracing::warn!(
                    endpoint = %endpoint.name,
                    error = %e,
                    "Endpoint failed activation"
                ),
            }
            activation.insert(endpoint.name.clone(), result);
        }

        Ok(Self {
            endpoints,
            by_name,
            activation,
        })
    }

    /// All endpoints ordered by (priority, name), active or not
    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    /// Endpoints that passed activation
    pub fn active(&self) -> impl Iterator<Item = &Arc<Endpoint>> {
        self.endpoints.iter().filter(|e| self.is_active(&e.name))
    }

    pub fn endpoint(&self, name: &str) -> Result<&Arc<Endpoint>, RegistryError> {
        self.by_name
            .get(name)
            .and_then(|&i| self.endpoints.get(i))
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn is_active(&self, name: &str) -> bool {
        matches!(self.activation.get(name), Some(Ok(())))
    }

    /// Why an endpoint is inactive, if it is
    pub fn activation_error(&self, name: &str) -> Option<&ConfigError> {
        self.activation.get(name).and_then(|r| r.as_ref().err())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

fn activate(endpoint: &Endpoint) -> Result<(), ConfigError> {
    let credential = endpoint
        .credential
        .as_ref()
        .ok_or_else(|| ConfigError::MissingCredential(endpoint.name.clone()))?;

    if !credential.is_well_formed() {
        return Err(ConfigError::MalformedCredential(endpoint.name.clone()));
    }

    endpoint
        .validate_url()
        .map_err(|reason| ConfigError::InvalidUrl {
            endpoint: endpoint.name.clone(),
            reason,
        })
}
