pub mod cache;
pub mod client;
pub mod host_trie;
pub mod nameserver;
pub mod picker;

use crate::error::ResolveError;
use cache::DnsCache;
use futures::future::BoxFuture;
use hickory_proto::rr::RecordType;
use host_trie::DomainTrie;
use nameserver::NameServer;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

/// Recursive resolver: static host table, then cache, then a race across all
/// configured nameservers (UDP/TCP/DoT/DoH).
pub struct Resolver {
    name_servers: Vec<NameServer>,
    hosts: DomainTrie,
    cache: DnsCache,
}

impl Resolver {
    pub fn new(name_server_uris: &[String], hosts: &HashMap<String, String>) -> Result<Self, ResolveError> {
        let name_servers = name_server_uris
            .iter()
            .map(|s| NameServer::parse(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name_servers,
            hosts: DomainTrie::new(hosts),
            cache: DnsCache::new(),
        })
    }

    /// Resolves `host` to a single IP address, preferring an IPv4 answer.
    /// IP literals pass through unchanged.
    ///
    /// Boxed rather than a plain `async fn`: the DoH transport resolves its
    /// own nameserver host through this same method (see
    /// `client::exchange_https`), which makes this function indirectly
    /// recursive through `lookup_ips` → `client::exchange`. An `impl Future`
    /// return type can't describe that cycle; boxing breaks it.
    pub fn resolve_ip<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<IpAddr, ResolveError>> {
        Box::pin(async move {
            if let Ok(ip) = host.parse::<IpAddr>() {
                return Ok(ip);
            }
            if let Some(ip) = self.hosts.lookup(host) {
                return Ok(ip);
            }
            if let Some(ips) = self.cache.get(host) {
                if let Some(ip) = ips.first() {
                    return Ok(*ip);
                }
            }

            let ips = self.lookup_ips(host).await?;
            ips.into_iter()
                .next()
                .ok_or_else(|| ResolveError::IpNotFound(host.to_string()))
        })
    }

    async fn lookup_ips(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        if self.name_servers.is_empty() {
            return Err(ResolveError::AllFailed("no nameservers configured".into()));
        }

        let query = client::build_query(host, RecordType::A)?;
        let tasks: Vec<_> = self
            .name_servers
            .iter()
            .map(|ns| client::exchange(ns, query.clone(), self))
            .collect();

        let response = picker::race(tasks).await?;
        let ips = client::answers_to_ips(&response);
        if let Some(ttl) = client::cache_ttl(&response) {
            self.cache.put(host, ips.clone(), Duration::from_secs(ttl as u64));
        }
        if ips.is_empty() {
            return Err(ResolveError::IpNotFound(host.to_string()));
        }
        Ok(ips)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ip_literal_passes_through_without_lookup() {
        let resolver = Resolver::new(&[], &HashMap::new()).unwrap();
        let ip = resolver.resolve_ip("127.0.0.1").await.unwrap();
        assert_eq!(ip, IpAddr::from([127, 0, 0, 1]));
    }

    #[tokio::test]
    async fn host_table_entry_short_circuits_network() {
        let mut hosts = HashMap::new();
        hosts.insert("internal.example".to_string(), "10.9.9.9".to_string());
        let resolver = Resolver::new(&[], &hosts).unwrap();
        let ip = resolver.resolve_ip("internal.example").await.unwrap();
        assert_eq!(ip, "10.9.9.9".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn no_nameservers_and_unknown_host_fails() {
        let resolver = Resolver::new(&[], &HashMap::new()).unwrap();
        assert!(resolver.resolve_ip("definitely-not-cached.example").await.is_err());
    }
}
