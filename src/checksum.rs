use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use crc::Crc;

use crate::error::Error;

const CRC32: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// CRC-32 over UTF-8 bytes, rendered as an unsigned decimal integer string on the wire.
///
/// A checksum serves two purposes in the protocol: it stands in for an arbitrary-length route
/// string (32 bits instead of the full path), and it correlates fragments belonging to the same
/// logical message. It is not cryptographic - checksum equality is treated as proof of
/// correlation, which is an accepted approximation.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Checksum(pub u32);

impl Checksum {
    pub fn of(bytes: impl AsRef<[u8]>) -> Checksum {
        Checksum(CRC32.checksum(bytes.as_ref()))
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Checksum({})", self.0)
    }
}

impl FromStr for Checksum {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>()
            .map(Checksum)
            .map_err(|_| Error::MalformedFrame(format!("not a checksum: {:?}", s)))
    }
}
