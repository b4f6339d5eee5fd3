use std::net::SocketAddr;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tracing::trace;

use super::IpFamily;

/// System resolver that only hands out addresses of one IP family, so the
/// connector never dials the other one.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FamilyResolver {
    family: IpFamily,
}

impl FamilyResolver {
    pub(crate) fn new(family: IpFamily) -> Self {
        Self { family }
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

impl Resolve for FamilyResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(lookup(name.as_str().to_owned(), self.family))
    }
}

async fn lookup(host: String, family: IpFamily) -> Result<Addrs, BoxError> {
    // The port is replaced by the connector.
    let resolved = tokio::net::lookup_host((host.as_str(), 0)).await?;
    let addrs: Vec<SocketAddr> = resolved.filter(|addr| family.matches(addr)).collect();

    if addrs.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("{host} has no {family} address"),
        )
        .into());
    }

    trace!(host = %host, count = addrs.len(), %family, "Resolved upstream host");
    Ok(Box::new(addrs.into_iter()))
}
