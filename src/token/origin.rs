//! "Is this token meant for me?" checks against the verifying host's identity.

use std::collections::HashSet;
use std::net::{IpAddr, ToSocketAddrs};

use tracing::debug;

pub trait HostIdentity: Send + Sync {
    /// True when `hostname` names this host.
    fn is_local(&self, hostname: &str) -> bool;
}

/// Matches by configured alias, by this machine's hostname, or by resolving the
/// name and comparing against the addresses of the local network interfaces.
#[derive(Debug, Clone, Default)]
pub struct LocalHostIdentity {
    aliases: Vec<String>,
}

impl LocalHostIdentity {
    pub fn new() -> Self { Self::default() }

    pub fn with_aliases<I, S>(aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { aliases: aliases.into_iter().map(Into::into).collect() }
    }

    pub fn machine_hostname() -> Option<String> {
        hostname::get().ok().and_then(|h| h.into_string().ok())
    }

    pub fn interface_addresses() -> HashSet<IpAddr> {
        let mut out = interface_addresses_os();
        out.insert(IpAddr::from([127, 0, 0, 1]));
        out.insert(IpAddr::from([0u16, 0, 0, 0, 0, 0, 0, 1]));
        out
    }
}

impl HostIdentity for LocalHostIdentity {
    fn is_local(&self, hostname: &str) -> bool {
        if self.aliases.iter().any(|a| a.eq_ignore_ascii_case(hostname)) {
            return true;
        }
        if Self::machine_hostname().is_some_and(|h| h.eq_ignore_ascii_case(hostname)) {
            return true;
        }
        let resolved: Vec<IpAddr> = match (hostname, 0u16).to_socket_addrs() {
            Ok(addrs) => addrs.map(|a| a.ip()).collect(),
            Err(e) => {
                debug!(target: "token", hostname, error = %e, "origin hostname did not resolve");
                return false;
            }
        };
        let local = Self::interface_addresses();
        resolved.iter().any(|ip| local.contains(ip))
    }
}

#[cfg(unix)]
fn interface_addresses_os() -> HashSet<IpAddr> {
    use std::net::{SocketAddrV4, SocketAddrV6};

    let mut out = HashSet::new();
    match nix::ifaddrs::getifaddrs() {
        Ok(ifaddrs) => {
            for ifa in ifaddrs {
                let Some(addr) = ifa.address else { continue };
                if let Some(v4) = addr.as_sockaddr_in() {
                    out.insert(IpAddr::V4(*SocketAddrV4::from(*v4).ip()));
                } else if let Some(v6) = addr.as_sockaddr_in6() {
                    out.insert(IpAddr::V6(*SocketAddrV6::from(*v6).ip()));
                }
            }
        }
        Err(e) => debug!(target: "token", error = %e, "could not enumerate interfaces"),
    }
    out
}

#[cfg(not(unix))]
fn interface_addresses_os() -> HashSet<IpAddr> { HashSet::new() }

/// Fixed set of names treated as local.
#[derive(Debug, Clone, Default)]
pub struct StaticHostIdentity {
    names: HashSet<String>,
}

impl StaticHostIdentity {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { names: names.into_iter().map(|n| n.into().to_ascii_lowercase()).collect() }
    }
}

impl HostIdentity for StaticHostIdentity {
    fn is_local(&self, hostname: &str) -> bool { self.names.contains(&hostname.to_ascii_lowercase()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_names_are_local() {
        let id = LocalHostIdentity::new();
        assert!(id.is_local("127.0.0.1"));
        assert!(id.is_local("localhost"));
        assert!(!id.is_local("192.0.2.1"));
    }

    #[test]
    fn aliases_and_machine_name() {
        let id = LocalHostIdentity::with_aliases(["gs.example.org"]);
        assert!(id.is_local("GS.example.org"));
        if let Some(h) = LocalHostIdentity::machine_hostname() {
            assert!(id.is_local(&h));
        }
    }

    #[test]
    fn static_identity() {
        let id = StaticHostIdentity::new(["gs1"]);
        assert!(id.is_local("GS1"));
        assert!(!id.is_local("gs2"));
    }
}
