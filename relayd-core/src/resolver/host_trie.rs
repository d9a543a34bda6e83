//! Static host table consulted before any network lookup. Supports exact
//! names and `*.example.com` wildcards; `localhost` resolves to `127.0.0.1`
//! unless the configuration overrides it.
use std::collections::HashMap;
use std::net::IpAddr;

pub struct DomainTrie {
    exact: HashMap<String, IpAddr>,
    wildcards: HashMap<String, IpAddr>,
}

impl DomainTrie {
    pub fn new(hosts: &HashMap<String, String>) -> Self {
        let mut exact = HashMap::new();
        let mut wildcards = HashMap::new();

        exact.insert("localhost".to_string(), IpAddr::from([127, 0, 0, 1]));

        for (domain, ip) in hosts {
            let Ok(addr) = ip.parse::<IpAddr>() else {
                tracing::warn!(domain, ip, "skipping host entry with invalid IP literal");
                continue;
            };
            if let Some(suffix) = domain.strip_prefix("*.") {
                wildcards.insert(suffix.to_lowercase(), addr);
            } else {
                exact.insert(domain.to_lowercase(), addr);
            }
        }

        Self { exact, wildcards }
    }

    pub fn lookup(&self, name: &str) -> Option<IpAddr> {
        let name = name.trim_end_matches('.').to_lowercase();
        if let Some(ip) = self.exact.get(&name) {
            return Some(*ip);
        }
        let mut rest = name.as_str();
        while let Some((_, suffix)) = rest.split_once('.') {
            if let Some(ip) = self.wildcards.get(suffix) {
                return Some(*ip);
            }
            rest = suffix;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_resolves_by_default() {
        let trie = DomainTrie::new(&HashMap::new());
        assert_eq!(trie.lookup("localhost"), Some(IpAddr::from([127, 0, 0, 1])));
    }

    #[test]
    fn wildcard_matches_subdomains() {
        let mut hosts = HashMap::new();
        hosts.insert("*.example.com".to_string(), "10.1.2.3".to_string());
        let trie = DomainTrie::new(&hosts);
        assert_eq!(trie.lookup("api.example.com"), Some("10.1.2.3".parse().unwrap()));
        assert_eq!(trie.lookup("example.com"), None);
    }

    #[test]
    fn exact_override_beats_default() {
        let mut hosts = HashMap::new();
        hosts.insert("localhost".to_string(), "::1".to_string());
        let trie = DomainTrie::new(&hosts);
        assert_eq!(trie.lookup("localhost"), Some("::1".parse().unwrap()));
    }
}
