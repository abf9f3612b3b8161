//! Public address list returned by the `GET_PUBLIC_IPS` control.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6};

use crate::codec::{ByteReader, ByteWriter, narrow, widen};
use crate::error::DecodeError;

const AF_INET: u16 = 2;
const AF_INET6: u16 = 10;
const SOCKADDR_LEN: usize = 28;
const ENTRY_LEN: usize = 4 + SOCKADDR_LEN;

/// One public address and the node currently hosting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicIp {
    /// Node serving the address.
    pub pnn: u32,
    /// The address itself.
    pub addr: SocketAddr,
}

/// Decodes the reply payload of a public address query.
///
/// # Errors
///
/// Fails on truncated input or an address family other than IPv4/IPv6.
pub fn decode_public_ips(data: &[u8]) -> Result<Vec<PublicIp>, DecodeError> {
    let mut reader = ByteReader::new(data);
    let count = widen(reader.u32("public_ips.num")?);
    let mut ips = Vec::new();
    for _ in 0..count {
        let pnn = reader.u32("public_ip.pnn")?;
        let mut addr = ByteReader::new(reader.take("public_ip.addr", SOCKADDR_LEN)?);
        ips.push(PublicIp {
            pnn,
            addr: decode_sockaddr(&mut addr)?,
        });
    }
    Ok(ips)
}

fn decode_sockaddr(reader: &mut ByteReader<'_>) -> Result<SocketAddr, DecodeError> {
    let family = reader.u16("sockaddr.family")?;
    let port = reader.u16_network("sockaddr.port")?;
    match family {
        AF_INET => {
            let octets = reader.octets::<4>("sockaddr.ipv4")?;
            Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
        }
        AF_INET6 => {
            let flowinfo = reader.u32_network("sockaddr.flowinfo")?;
            let octets = reader.octets::<16>("sockaddr.ipv6")?;
            let scope_id = reader.u32("sockaddr.scope_id")?;
            Ok(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(octets),
                port,
                flowinfo,
                scope_id,
            )))
        }
        other => Err(DecodeError::UnknownAddressFamily(other)),
    }
}

/// Encodes a public address list in the daemon's reply layout.
#[must_use]
pub fn encode_public_ips(ips: &[PublicIp]) -> Vec<u8> {
    let mut writer = ByteWriter::with_capacity(4 + ips.len() * ENTRY_LEN);
    writer.u32(narrow(ips.len()));
    for ip in ips {
        let start = writer.len();
        writer.u32(ip.pnn);
        match ip.addr {
            SocketAddr::V4(v4) => {
                writer
                    .u16(AF_INET)
                    .u16_network(v4.port())
                    .raw(&v4.ip().octets());
            }
            SocketAddr::V6(v6) => {
                writer
                    .u16(AF_INET6)
                    .u16_network(v6.port())
                    .u32_network(v6.flowinfo())
                    .raw(&v6.ip().octets())
                    .u32(v6.scope_id());
            }
        }
        let used = writer.len() - start;
        writer.zeros(ENTRY_LEN.saturating_sub(used));
    }
    writer.finish()
}
