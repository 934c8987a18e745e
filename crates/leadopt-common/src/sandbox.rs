use reqwest::{Client, ClientBuilder};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;
use crate::error::LeadOptError;

/// Domains the pipeline talks to.
pub const DEFAULT_ALLOWLIST: &[&str] = &[
    "pubchem.ncbi.nlm.nih.gov", // PubChem PUG-REST
    "proteins.plus",            // DoGSiteScorer
    "files.rcsb.org",           // PDB downloads
    "localhost",
    "127.0.0.1",
];

/// An HTTP client that refuses requests to hosts outside its allowlist.
#[derive(Debug, Clone)]
pub struct SandboxClient {
    client: Client,
    allowlist: HashSet<String>,
}

impl SandboxClient {
    /// Creates a client with the default allowlist and a 30 s timeout.
    pub fn new() -> Result<Self, LeadOptError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, LeadOptError> {
        let allowlist = DEFAULT_ALLOWLIST.iter().map(|d| d.to_string()).collect();

        let client = ClientBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("leadopt/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LeadOptError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, allowlist })
    }

    /// Appends an exact hostname to the allowlist.
    pub fn allow_domain(&mut self, domain: &str) {
        self.allowlist.insert(domain.to_string());
    }

    /// Validates if a URL is permitted under the current policy.
    pub fn is_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        self.allowlist
            .iter()
            .any(|allowed| host == allowed || host.ends_with(&format!(".{}", allowed)))
    }

    fn check(&self, url: &str) -> Result<(), LeadOptError> {
        if self.is_allowed(url) {
            Ok(())
        } else {
            Err(LeadOptError::Security(format!(
                "Network capabilities capped: domain not in allowlist for URL {}",
                url
            )))
        }
    }

    pub fn get(&self, url: &str) -> Result<reqwest::RequestBuilder, LeadOptError> {
        self.check(url)?;
        Ok(self.client.get(url))
    }

    pub fn post(&self, url: &str) -> Result<reqwest::RequestBuilder, LeadOptError> {
        self.check(url)?;
        Ok(self.client.post(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowlist_accepts_pipeline_hosts() {
        let client = SandboxClient::new().unwrap();
        assert!(client.is_allowed("https://pubchem.ncbi.nlm.nih.gov/rest/pug/compound/cid/2244/JSON"));
        assert!(client.is_allowed("https://proteins.plus/api/dogsite_rest"));
        assert!(client.is_allowed("https://files.rcsb.org/download/3w32.pdb"));
    }

    #[test]
    fn test_allowlist_rejects_other_hosts() {
        let client = SandboxClient::new().unwrap();
        assert!(!client.is_allowed("https://example.com/"));
        assert!(!client.is_allowed("not a url"));
        assert!(matches!(client.get("https://evil.org/x"), Err(LeadOptError::Security(_))));
    }

    #[test]
    fn test_allow_domain_extends_policy() {
        let mut client = SandboxClient::new().unwrap();
        client.allow_domain("mirror.example.org");
        assert!(client.is_allowed("http://mirror.example.org/pdb"));
        assert!(client.is_allowed("http://eu.mirror.example.org/pdb"));
    }
}
