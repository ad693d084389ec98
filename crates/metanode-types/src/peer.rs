//! Peer identities, addresses and peer references.
//!
//! A [`PeerId`] is the base58 encoding of a sha2-256 multihash of the peer's
//! public key. Transport addresses are [`Multiaddr`]s such as
//! `/ip4/127.0.0.1/tcp/9002`, and a full peer address appends the identity:
//! `/ip4/127.0.0.1/tcp/9002/p2p/QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG`.

use crate::error::ParseError;
use ed25519_dalek::VerifyingKey;
use multiaddr::{Multiaddr, Protocol};
use multihash::Multihash;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// Multihash code for sha2-256.
const SHA2_256_CODE: u64 = 0x12;

/// Digest length of sha2-256 in bytes.
const SHA2_256_LEN: u8 = 32;

/// Leading character of every self-describing address string.
pub const ADDRESS_MARKER: char = '/';

type Hash = Multihash<64>;

/// Compute the base58 sha2-256 multihash of `data`.
///
/// Used both for peer ids (hash of the public key) and for data object keys
/// (hash of the payload).
pub fn multihash_b58(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let hash = Hash::wrap(SHA2_256_CODE, &digest)
        .expect("sha2-256 digest fits a 64-byte multihash");
    bs58::encode(hash.to_bytes()).into_string()
}

/// Identity of a peer, derived from its public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    /// Derive the peer id for an ed25519 public key.
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        Self(multihash_b58(key.as_bytes()))
    }

    /// Validate and wrap a base58 peer id string.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if s.is_empty() {
            return Err(ParseError::peer_id(s, "empty"));
        }
        let decoded = bs58::decode(s)
            .into_vec()
            .map_err(|e| ParseError::peer_id(s, format!("invalid base58: {e}")))?;
        let hash = Hash::from_bytes(&decoded)
            .map_err(|e| ParseError::peer_id(s, format!("invalid multihash: {e}")))?;
        if hash.code() != SHA2_256_CODE || hash.size() != SHA2_256_LEN {
            return Err(ParseError::peer_id(s, "not a sha2-256 multihash"));
        }
        Ok(Self(s.to_string()))
    }

    /// The base58 string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse a transport address.
pub fn parse_multiaddr(s: &str) -> Result<Multiaddr, ParseError> {
    s.parse::<Multiaddr>()
        .map_err(|e| ParseError::address(s, e.to_string()))
}

/// `host:port` target suitable for `TcpStream::connect`, if `addr` starts
/// with an ip or dns host followed by a tcp port.
pub fn tcp_target(addr: &Multiaddr) -> Option<String> {
    let mut protocols = addr.iter();
    let host = match protocols.next()? {
        Protocol::Ip4(ip) => ip.to_string(),
        Protocol::Ip6(ip) => format!("[{ip}]"),
        Protocol::Dns(name) | Protocol::Dns4(name) | Protocol::Dns6(name) => name.to_string(),
        _ => return None,
    };
    match protocols.next()? {
        Protocol::Tcp(port) => Some(format!("{host}:{port}")),
        _ => None,
    }
}

/// `/ip4|ip6/<ip>/tcp/<port>` for a bound socket.
pub fn socket_multiaddr(addr: SocketAddr) -> Multiaddr {
    let host = match addr.ip() {
        IpAddr::V4(ip) => Protocol::Ip4(ip),
        IpAddr::V6(ip) => Protocol::Ip6(ip),
    };
    Multiaddr::empty()
        .with(host)
        .with(Protocol::Tcp(addr.port()))
}

/// A peer identity together with the addresses it can be reached on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: PeerId,
    #[serde(default)]
    pub addrs: Vec<Multiaddr>,
}

impl PeerInfo {
    pub fn new(id: PeerId, addrs: Vec<Multiaddr>) -> Self {
        Self { id, addrs }
    }

    /// Full address strings (`<addr>/p2p/<id>`) for every known address.
    pub fn full_addresses(&self) -> Vec<String> {
        self.addrs
            .iter()
            .map(|a| format!("{a}/p2p/{}", self.id))
            .collect()
    }
}

impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        if !self.addrs.is_empty() {
            let addrs: Vec<String> = self.addrs.iter().map(|a| a.to_string()).collect();
            write!(f, " [{}]", addrs.join(", "))?;
        }
        Ok(())
    }
}

/// Decode a full peer address (`<addr>/p2p/<id>`, `/ipfs/` also accepted).
///
/// An address consisting of only `/p2p/<id>` yields a peer with no addresses.
pub fn parse_peer_address(s: &str) -> Result<PeerInfo, ParseError> {
    let mut addr = parse_multiaddr(s)?;
    let id = match addr.pop() {
        Some(Protocol::P2p(id)) => {
            PeerId::parse(&id.to_string()).map_err(|e| ParseError::address(s, e.to_string()))?
        }
        _ => return Err(ParseError::address(s, "missing /p2p/<peer-id> component")),
    };
    let addrs = if addr.is_empty() { Vec::new() } else { vec![addr] };
    Ok(PeerInfo { id, addrs })
}

/// The shapes a caller may use to name a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerRef {
    /// Already resolved; used as-is.
    Info(PeerInfo),
    /// Bare peer id; resolved through the peer book or the directory.
    Id(String),
    /// Full self-describing address string; decoded locally.
    Addr(String),
}

impl From<PeerInfo> for PeerRef {
    fn from(info: PeerInfo) -> Self {
        Self::Info(info)
    }
}

impl From<&PeerInfo> for PeerRef {
    fn from(info: &PeerInfo) -> Self {
        Self::Info(info.clone())
    }
}

impl From<PeerId> for PeerRef {
    fn from(id: PeerId) -> Self {
        Self::Id(id.0)
    }
}

impl From<&PeerId> for PeerRef {
    fn from(id: &PeerId) -> Self {
        Self::Id(id.0.clone())
    }
}

impl From<&str> for PeerRef {
    fn from(s: &str) -> Self {
        if s.starts_with(ADDRESS_MARKER) {
            Self::Addr(s.to_string())
        } else {
            Self::Id(s.to_string())
        }
    }
}

impl From<String> for PeerRef {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}
