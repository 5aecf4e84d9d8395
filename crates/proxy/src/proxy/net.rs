use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::protocol::ConfigError;

/// An IPv4 network, as used by forwarded header exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Net {
    addr: Ipv4Addr,
    mask: u32,
}

impl Ipv4Net {
    /// Creates the network of `addr` with a `prefix` bits mask.
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, ConfigError> {
        if prefix > 32 {
            return Err(ConfigError::invalid_network(format!("prefix length {prefix} exceeds 32")));
        }
        let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
        Ok(Self { addr: Ipv4Addr::from(u32::from(addr) & mask), mask })
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask == u32::from(self.addr)
    }
}

impl FromStr for Ipv4Net {
    type Err = ConfigError;

    /// Parses `a.b.c.d` or `a.b.c.d/n`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => {
                let prefix = prefix.parse::<u8>().map_err(|e| ConfigError::invalid_network(format!("{s}: {e}")))?;
                (addr, prefix)
            }
            None => (s, 32),
        };
        let addr = addr.parse::<Ipv4Addr>().map_err(|e| ConfigError::invalid_network(format!("{s}: {e}")))?;
        Self::new(addr, prefix)
    }
}

impl fmt::Display for Ipv4Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.mask.count_ones())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_contains() {
        let net: Ipv4Net = "192.168.1.17/24".parse().unwrap();
        assert_eq!(net.to_string(), "192.168.1.0/24");
        assert!(net.contains(Ipv4Addr::new(192, 168, 1, 200)));
        assert!(!net.contains(Ipv4Addr::new(192, 168, 2, 1)));
    }

    #[test]
    fn test_host_and_any() {
        let host: Ipv4Net = "10.0.0.1".parse().unwrap();
        assert!(host.contains(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(!host.contains(Ipv4Addr::new(10, 0, 0, 2)));

        let any: Ipv4Net = "0.0.0.0/0".parse().unwrap();
        assert!(any.contains(Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[test]
    fn test_invalid() {
        assert!("10.0.0.1/33".parse::<Ipv4Net>().is_err());
        assert!("10.0.0/8".parse::<Ipv4Net>().is_err());
        assert!("10.0.0.1/x".parse::<Ipv4Net>().is_err());
    }
}
