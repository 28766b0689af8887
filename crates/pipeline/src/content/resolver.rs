//! Content addressing resolver
//!
//! Maps a `ContentRef` to the URLs worth trying, in priority order.

use super::ContentRef;
use studyforge_common::config::ContentConfig;

/// Gateway set used to turn references into fetchable URLs
#[derive(Debug, Clone)]
pub struct GatewayResolver {
    ipfs_gateways: Vec<String>,
    arweave_gateways: Vec<String>,
    ls3_gateway: String,
}

fn trim_base(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

impl GatewayResolver {
    pub fn new(ipfs_gateways: Vec<String>, arweave_gateways: Vec<String>, ls3_gateway: String) -> Self {
        Self {
            ipfs_gateways: ipfs_gateways.iter().map(|g| trim_base(g)).filter(|g| !g.is_empty()).collect(),
            arweave_gateways: arweave_gateways.iter().map(|g| trim_base(g)).filter(|g| !g.is_empty()).collect(),
            ls3_gateway: trim_base(&ls3_gateway),
        }
    }

    pub fn from_config(config: &ContentConfig) -> Self {
        Self::new(
            config.ipfs_gateways.clone(),
            config.arweave_gateways.clone(),
            config.ls3_gateway.clone(),
        )
    }

    fn ipfs_url(base: &str, cid: &str) -> String {
        if base.ends_with("/ipfs") {
            format!("{}/{}", base, cid)
        } else {
            format!("{}/ipfs/{}", base, cid)
        }
    }

    fn ls3_url(&self, id: &str) -> String {
        format!("{}/resolve/{}", self.ls3_gateway, id)
    }

    /// Candidate URLs for `reference`, primary gateway first
    pub fn candidates(&self, reference: &ContentRef) -> Vec<String> {
        match reference {
            ContentRef::Ipfs(cid) => self
                .ipfs_gateways
                .iter()
                .map(|base| Self::ipfs_url(base, cid))
                .collect(),
            ContentRef::Arweave(id) => {
                let mut urls: Vec<String> = self
                    .arweave_gateways
                    .iter()
                    .map(|base| format!("{}/{}", base, id))
                    .collect();
                // Anchored items stay cached on the Load gateway
                if !self.ls3_gateway.is_empty() {
                    urls.push(self.ls3_url(id));
                }
                urls
            }
            ContentRef::Ls3(id) => vec![self.ls3_url(id)],
            ContentRef::Http(url) => vec![url.clone()],
        }
    }

    /// Primary URL for display in responses
    pub fn primary_url(&self, reference: &ContentRef) -> Option<String> {
        self.candidates(reference).into_iter().next()
    }
}
