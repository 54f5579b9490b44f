//! Public prefix type: an [`Addr`] paired with a mask length.

use std::fmt;
use std::net::IpAddr;

use inetnum::addr::Prefix as InetnumPrefix;

use crate::addr::Addr;
use crate::error::{TableError, TableResult};

/// Upper bound on mask length, dictated by the 128-bit address width.
pub const MAX_MASKLEN: u8 = 128;

/// Maximum length, in bytes, of a [`crate::Table`] name (including the
/// terminator a C caller would reserve for).
pub const NAME_LEN: usize = 31;

/// A validated (address, mask length) pair.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Prefix {
    pub addr: Addr,
    pub masklen: u8,
}

impl Prefix {
    /// Builds a prefix, masking off any host bits beyond `masklen`.
    ///
    /// Returns [`TableError::Invalid`] if `masklen` exceeds
    /// [`MAX_MASKLEN`].
    pub fn new(addr: Addr, masklen: u8) -> TableResult<Self> {
        if masklen > MAX_MASKLEN {
            return Err(TableError::Invalid("masklen exceeds 128 bits"));
        }
        Ok(Prefix {
            addr: addr.masked(masklen),
            masklen,
        })
    }
}

impl fmt::Debug for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let is_v4 = self.addr.0[4..].iter().all(|&b| b == 0);
        if is_v4 {
            write!(
                f,
                "{}.{}.{}.{}/{}",
                self.addr.0[0], self.addr.0[1], self.addr.0[2], self.addr.0[3], self.masklen
            )
        } else {
            let ip = std::net::Ipv6Addr::from(self.addr.0);
            write!(f, "{}/{}", ip, self.masklen)
        }
    }
}

impl TryFrom<InetnumPrefix> for Prefix {
    type Error = TableError;

    fn try_from(p: InetnumPrefix) -> Result<Self, Self::Error> {
        let addr = match p.addr() {
            IpAddr::V4(v4) => Addr::from_ipv4(v4),
            IpAddr::V6(v6) => Addr::from_ipv6(v6),
        };
        Prefix::new(addr, p.len())
    }
}
