//! IP access control lists.

use std::{fmt, net::IpAddr, str::FromStr};
use thiserror::Error;

/// Ordered allow/deny rules over peer addresses.
///
/// # Grammar
/// ```text
/// list  = rule *( "," rule )
/// rule  = ( "+" / "-" ) addr [ "/" prefix ]
/// ```
/// `+` allows, `-` denies; `addr` is an IPv4 or IPv6 address. Whitespace
/// around rules is ignored.
///
/// Rules are checked in order and the first one containing the peer decides.
/// An empty list allows everyone; a non-empty list denies peers that no rule
/// matches. IPv4-mapped IPv6 peers (`::ffff:a.b.c.d`) are matched as IPv4.
///
/// ```
/// use embed_web::AccessList;
///
/// let acl: AccessList = "-10.0.0.13, +10.0.0.0/8, +::1".parse().unwrap();
///
/// assert!(acl.allows("10.1.2.3".parse().unwrap()));
/// assert!(!acl.allows("10.0.0.13".parse().unwrap()));
/// assert!(!acl.allows("192.168.1.1".parse().unwrap()));
/// assert!(acl.allows("::1".parse().unwrap()));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessList {
    rules: Vec<Rule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rule {
    allow: bool,
    network: IpAddr,
    prefix: u8,
}

/// A malformed access control list.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AclError {
    #[error("ACL rule `{0}` must start with `+` or `-`")]
    MissingSign(String),
    #[error("ACL rule `{0}` has an invalid address")]
    InvalidAddress(String),
    #[error("ACL rule `{0}` has an invalid prefix length")]
    InvalidPrefix(String),
}

impl AccessList {
    /// Whether a peer at `addr` may connect.
    pub fn allows(&self, addr: IpAddr) -> bool {
        if self.rules.is_empty() {
            return true;
        }

        let addr = canonical(addr);
        self.rules
            .iter()
            .find(|rule| rule.contains(addr))
            .map_or(false, |rule| rule.allow)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FromStr for AccessList {
    type Err = AclError;

    fn from_str(src: &str) -> Result<Self, Self::Err> {
        let rules = src
            .split(',')
            .map(str::trim)
            .filter(|rule| !rule.is_empty())
            .map(Rule::parse)
            .collect::<Result<_, _>>()?;

        Ok(AccessList { rules })
    }
}

impl Rule {
    fn parse(src: &str) -> Result<Self, AclError> {
        let (allow, rest) = match src.as_bytes()[0] {
            b'+' => (true, &src[1..]),
            b'-' => (false, &src[1..]),
            _ => return Err(AclError::MissingSign(src.into())),
        };

        let (addr, prefix) = match rest.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (rest, None),
        };

        let network = addr
            .trim()
            .parse::<IpAddr>()
            .map_err(|_| AclError::InvalidAddress(src.into()))?;
        let network = canonical(network);

        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = match prefix {
            Some(prefix) => prefix
                .trim()
                .parse::<u8>()
                .ok()
                .filter(|prefix| *prefix <= max)
                .ok_or_else(|| AclError::InvalidPrefix(src.into()))?,
            None => max,
        };

        Ok(Rule {
            allow,
            network,
            prefix,
        })
    }

    fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX.checked_shl(32 - self.prefix as u32).unwrap_or(0);
                u32::from(net) & mask == u32::from(addr) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX.checked_shl(128 - self.prefix as u32).unwrap_or(0);
                u128::from(net) & mask == u128::from(addr) & mask
            }
            _ => false,
        }
    }
}

fn canonical(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => addr,
        },
        IpAddr::V4(_) => addr,
    }
}

impl fmt::Display for AccessList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rule) in self.rules.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            let sign = if rule.allow { '+' } else { '-' };
            write!(f, "{sign}{}/{}", rule.network, rule.prefix)?;
        }
        Ok(())
    }
}
