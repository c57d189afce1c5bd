//! IPv4 address whitelist applied by the acceptor.
//!
//! A whitelist is written like an address, `a.b.c.d`, where any octet may be
//! `*` to match every value: `192.168.1.*` admits `192.168.1.0`-`192.168.1.255`.

use std::{fmt, net::IpAddr, str::FromStr};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid whitelist {0:?}: expected x.x.x.x with x in 0-255 or *")]
pub struct ParseWhitelistError(String);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Whitelist {
    /// `None` is a wildcard octet
    octets: [Option<u8>; 4],
}

impl Whitelist {
    /// Whether a peer may connect. IPv6 peers pass only as IPv4-mapped addresses.
    pub fn allows(&self, ip: IpAddr) -> bool {
        let v4 = match ip {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => v4,
                None => return false,
            },
        };

        self.octets
            .iter()
            .zip(v4.octets())
            .all(|(want, got)| want.is_none_or(|w| w == got))
    }
}

impl FromStr for Whitelist {
    type Err = ParseWhitelistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseWhitelistError(s.to_owned());
        let mut octets = [None; 4];
        let mut parts = s.split('.');

        for octet in octets.iter_mut() {
            *octet = match parts.next().ok_or_else(err)? {
                "*" => None,
                n => Some(n.parse().map_err(|_| err())?),
            };
        }

        if parts.next().is_some() {
            return Err(err());
        }
        Ok(Whitelist { octets })
    }
}

impl fmt::Display for Whitelist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, octet) in self.octets.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match octet {
                Some(n) => write!(f, "{}", n)?,
                None => f.write_str("*")?,
            }
        }
        Ok(())
    }
}
