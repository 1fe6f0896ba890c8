use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnetwork::{ipv4_mask_to_prefix, ipv6_mask_to_prefix, Ipv4Network, Ipv6Network};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// 48-bit link-layer address with the usual colon-hex text form.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Sentinel for "link-layer address not (yet) known".
    pub const NONE: MacAddress = MacAddress([0; 6]);

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    /// The address as a 48-bit big-endian integer. Agent ids are derived
    /// from the control interface's MAC this way.
    pub fn as_u64(&self) -> u64 {
        self.0.iter().fold(0u64, |id, b| (id << 8) | u64::from(*b))
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(octets: [u8; 6]) -> Self {
        MacAddress(octets)
    }
}

impl TryFrom<&[u8]> for MacAddress {
    type Error = AddressError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != 6 {
            return Err(AddressError::InvalidMac(format!("{:?}", bytes)));
        }
        let mut octets = [0u8; 6];
        octets.copy_from_slice(bytes);
        Ok(MacAddress(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for MacAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| AddressError::InvalidMac(s.to_string()))?;
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| AddressError::InvalidMac(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(AddressError::InvalidMac(s.to_string()));
        }
        Ok(MacAddress(octets))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Address family of an IP value, where the bare `IpAddr` isn't at hand.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Family {
    Ipv4,
    Ipv6,
}

impl Family {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::Ipv4,
            IpAddr::V6(_) => Family::Ipv6,
        }
    }

    /// The all-zeros address, which doubles as the zero-length mask.
    pub fn zero(&self) -> IpAddr {
        match self {
            Family::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Family::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    pub fn full_prefix(&self) -> u8 {
        match self {
            Family::Ipv4 => 32,
            Family::Ipv6 => 128,
        }
    }
}

/// Canonical netmask for a prefix length.
pub fn mask_from_prefix(family: Family, prefix_len: u8) -> Result<IpAddr, AddressError> {
    match family {
        Family::Ipv4 => Ipv4Network::new(Ipv4Addr::UNSPECIFIED, prefix_len)
            .map(|net| IpAddr::V4(net.mask()))
            .map_err(|_| AddressError::InvalidPrefix(prefix_len)),
        Family::Ipv6 => Ipv6Network::new(Ipv6Addr::UNSPECIFIED, prefix_len)
            .map(|net| IpAddr::V6(net.mask()))
            .map_err(|_| AddressError::InvalidPrefix(prefix_len)),
    }
}

/// Prefix length of a mask. Non-contiguous masks are an error.
pub fn prefix_len(mask: &IpAddr) -> Result<u8, AddressError> {
    match mask {
        IpAddr::V4(m) => ipv4_mask_to_prefix(*m).map_err(|_| AddressError::InvalidMask(*mask)),
        IpAddr::V6(m) => ipv6_mask_to_prefix(*m).map_err(|_| AddressError::InvalidMask(*mask)),
    }
}

/// The host mask (/32 or /128) for a family.
pub fn full_mask(family: Family) -> IpAddr {
    match family {
        Family::Ipv4 => IpAddr::V4(Ipv4Addr::BROADCAST),
        Family::Ipv6 => IpAddr::V6(Ipv6Addr::from(u128::MAX)),
    }
}

#[derive(Debug, PartialEq)]
pub enum AddressError {
    InvalidPrefix(u8),
    InvalidMask(IpAddr),
    InvalidMac(String),
    FamilyMismatch,
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use AddressError::*;
        match self {
            InvalidPrefix(len) => write!(f, "Invalid prefix length {}", len),
            InvalidMask(mask) => write!(f, "Invalid (non-contiguous) mask {}", mask),
            InvalidMac(s) => write!(f, "Invalid MAC address \"{}\"", s),
            FamilyMismatch => write!(f, "Address and mask families differ"),
        }
    }
}

impl std::error::Error for AddressError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(mac.octets(), [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert!("aa:bb:cc:dd:ee".parse::<MacAddress>().is_err());
        assert!("aa:bb:cc:dd:ee:ff:00".parse::<MacAddress>().is_err());
        assert!("zz:bb:cc:dd:ee:ff".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_mac_none() {
        assert!(MacAddress::NONE.is_none());
        assert_eq!(MacAddress::NONE.to_string(), "00:00:00:00:00:00");
        let mac: MacAddress = "00:00:00:00:00:01".parse().unwrap();
        assert!(!mac.is_none());
    }

    #[test]
    fn test_mac_as_u64() {
        let mac: MacAddress = "00:00:00:00:01:02".parse().unwrap();
        assert_eq!(mac.as_u64(), 0x0102);
        let mac: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(mac.as_u64(), 0xaabb_ccdd_eeff);
    }

    #[test]
    fn test_mask_from_prefix() {
        assert_eq!(
            mask_from_prefix(Family::Ipv4, 24).unwrap(),
            "255.255.255.0".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            mask_from_prefix(Family::Ipv4, 0).unwrap(),
            "0.0.0.0".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            mask_from_prefix(Family::Ipv6, 64).unwrap(),
            "ffff:ffff:ffff:ffff::".parse::<IpAddr>().unwrap()
        );
        assert!(mask_from_prefix(Family::Ipv4, 33).is_err());
    }

    #[test]
    fn test_prefix_len() {
        assert_eq!(
            prefix_len(&"255.255.255.0".parse::<IpAddr>().unwrap()).unwrap(),
            24
        );
        assert_eq!(prefix_len(&"0.0.0.0".parse::<IpAddr>().unwrap()).unwrap(), 0);
        assert_eq!(
            prefix_len(&"255.255.255.255".parse::<IpAddr>().unwrap()).unwrap(),
            32
        );
        // A hole in the mask is not a prefix
        assert!(prefix_len(&"255.0.255.0".parse::<IpAddr>().unwrap()).is_err());
    }

    #[test]
    fn test_full_mask() {
        assert_eq!(prefix_len(&full_mask(Family::Ipv4)).unwrap(), 32);
        assert_eq!(prefix_len(&full_mask(Family::Ipv6)).unwrap(), 128);
    }
}
