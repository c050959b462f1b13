use std::fmt;
use std::str::FromStr;

use crate::error::WireError;

/// A 6-byte IEEE 802 MAC address, the canonical node identifier on the mesh.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);
    pub const ZERO: MacAddr = MacAddr([0x00; 6]);

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < 6 {
            return Err(WireError::Truncated { got: bytes.len(), need: 6 });
        }
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&bytes[..6]);
        Ok(MacAddr(mac))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for MacAddr {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 6 {
            return Err(WireError::BadAddress(s.into()));
        }
        let mut mac = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() || part.len() > 2 {
                return Err(WireError::BadAddress(s.into()));
            }
            let raw = hex::decode(format!("{:0>2}", part))
                .map_err(|_| WireError::BadAddress(s.into()))?;
            mac[i] = raw[0];
        }
        Ok(MacAddr(mac))
    }
}
