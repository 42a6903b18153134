//! DNS utilities for outbound delivery
//!
//! Mail exchanger lookup sits behind the [`MxResolver`] trait so the delivery
//! client can be pointed at a fixed host in tests or smart-host setups.

use crate::error::DeliveryError;
use async_trait::async_trait;
use tracing::{debug, info, warn};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Resolves the mail exchangers for a domain, most preferred first
#[async_trait]
pub trait MxResolver: Send + Sync {
    async fn lookup_mx(&self, domain: &str) -> Result<Vec<String>, DeliveryError>;
}

/// MX lookup through the system's DNS
pub struct DnsMxResolver {
    resolver: TokioAsyncResolver,
}

impl DnsMxResolver {
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }
}

impl Default for DnsMxResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MxResolver for DnsMxResolver {
    async fn lookup_mx(&self, domain: &str) -> Result<Vec<String>, DeliveryError> {
        info!("Looking up MX records for {}", domain);

        let mx_lookup = self.resolver.mx_lookup(domain).await.map_err(|e| {
            warn!("MX lookup failed for {}: {}", domain, e);
            DeliveryError::Resolution {
                domain: domain.to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut mx_records: Vec<(u16, String)> = mx_lookup
            .iter()
            .map(|mx| {
                let exchange = mx.exchange().to_utf8();
                (mx.preference(), exchange.trim_end_matches('.').to_string())
            })
            .filter(|(_, host)| !host.is_empty())
            .collect();

        mx_records.sort_by_key(|(priority, _)| *priority);

        debug!("Found {} MX records for {}", mx_records.len(), domain);

        if mx_records.is_empty() {
            return Err(DeliveryError::Resolution {
                domain: domain.to_string(),
                reason: "no MX found".to_string(),
            });
        }

        Ok(mx_records.into_iter().map(|(_, host)| host).collect())
    }
}

/// Resolver that answers every domain with the same host
pub struct StaticMxResolver {
    host: String,
}

impl StaticMxResolver {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

#[async_trait]
impl MxResolver for StaticMxResolver {
    async fn lookup_mx(&self, _domain: &str) -> Result<Vec<String>, DeliveryError> {
        Ok(vec![self.host.clone()])
    }
}
