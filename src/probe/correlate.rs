use pnet::packet::icmp::{IcmpPacket, IcmpTypes};
use pnet::packet::ipv4::Ipv4Packet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::probe::icmp::ICMP_HEADER_SIZE;

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMPV6_DEST_UNREACHABLE: u8 = 1;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;
const IPPROTO_ICMP: u8 = 1;
const IPPROTO_ICMPV6: u8 = 58;
const IPV6_HEADER_SIZE: usize = 40;

/// What kind of answer a reply carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    EchoReply,
    /// Destination/host unreachable with the ICMP code
    Unreachable(u8),
}

/// An ICMP message that answers one of our echo requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub responder: IpAddr,
    pub sequence: u16,
    pub kind: ReplyKind,
    /// Destination the original request was sent to
    pub original_dest: IpAddr,
}

/// Parse a received ICMP message and keep it only if it answers our probe
///
/// `is_dgram` means the buffer starts at the ICMP header. Linux also strips
/// the IPv6 header on raw ICMPv6 sockets, so IPv6 is always parsed headerless.
///
/// Returns None for malformed packets, other processes' traffic, bad
/// checksums and ICMP types we do not classify.
pub fn parse_reply(data: &[u8], responder: IpAddr, our_identifier: u16, is_dgram: bool) -> Option<ParsedReply> {
    match responder {
        IpAddr::V4(_) if !is_dgram => {
            let ip = Ipv4Packet::new(data)?;
            if ip.get_version() != 4 {
                return None;
            }
            let header_len = ip.get_header_length() as usize * 4;
            parse_icmp_v4(data.get(header_len..)?, responder, our_identifier, is_dgram)
        }
        IpAddr::V4(_) => parse_icmp_v4(data, responder, our_identifier, is_dgram),
        IpAddr::V6(_) => parse_icmp_v6(data, responder, our_identifier, is_dgram),
    }
}

fn parse_icmp_v4(icmp: &[u8], responder: IpAddr, our_identifier: u16, is_dgram: bool) -> Option<ParsedReply> {
    let packet = IcmpPacket::new(icmp)?;
    if icmp.len() < ICMP_HEADER_SIZE {
        return None;
    }

    match packet.get_icmp_type() {
        IcmpTypes::EchoReply => {
            if !validate_icmp_checksum(icmp) {
                return None;
            }
            let sequence = match_echo_identity(icmp, our_identifier, is_dgram)?;
            Some(ParsedReply {
                responder,
                sequence,
                kind: ReplyKind::EchoReply,
                original_dest: responder,
            })
        }
        IcmpTypes::DestinationUnreachable => {
            let code = packet.get_icmp_code().0;
            let quoted = icmp.get(ICMP_HEADER_SIZE..)?;
            let quoted_ip = Ipv4Packet::new(quoted)?;
            if quoted_ip.get_version() != 4 || quoted_ip.get_next_level_protocol().0 != IPPROTO_ICMP {
                return None;
            }
            let quoted_icmp = quoted.get(quoted_ip.get_header_length() as usize * 4..)?;
            let sequence = match_quoted_request(quoted_icmp, ICMP_ECHO_REQUEST, our_identifier, is_dgram)?;
            Some(ParsedReply {
                responder,
                sequence,
                kind: ReplyKind::Unreachable(code),
                original_dest: IpAddr::V4(Ipv4Addr::from(quoted_ip.get_destination())),
            })
        }
        _ => None,
    }
}

fn parse_icmp_v6(icmp: &[u8], responder: IpAddr, our_identifier: u16, is_dgram: bool) -> Option<ParsedReply> {
    if icmp.len() < ICMP_HEADER_SIZE {
        return None;
    }

    match icmp[0] {
        ICMPV6_ECHO_REPLY => {
            let sequence = match_echo_identity(icmp, our_identifier, is_dgram)?;
            Some(ParsedReply {
                responder,
                sequence,
                kind: ReplyKind::EchoReply,
                original_dest: responder,
            })
        }
        ICMPV6_DEST_UNREACHABLE => {
            let quoted = icmp.get(ICMP_HEADER_SIZE..)?;
            if quoted.len() < IPV6_HEADER_SIZE || quoted[0] >> 4 != 6 || quoted[6] != IPPROTO_ICMPV6 {
                return None;
            }
            let dest: [u8; 16] = quoted[24..40].try_into().ok()?;
            let sequence = match_quoted_request(
                &quoted[IPV6_HEADER_SIZE..],
                ICMPV6_ECHO_REQUEST,
                our_identifier,
                is_dgram,
            )?;
            Some(ParsedReply {
                responder,
                sequence,
                kind: ReplyKind::Unreachable(icmp[1]),
                original_dest: IpAddr::V6(Ipv6Addr::from(dest)),
            })
        }
        _ => None,
    }
}

/// Identify an echo reply by header identifier, or by the payload copy
/// when a DGRAM socket let the kernel rewrite the header
fn match_echo_identity(icmp: &[u8], our_identifier: u16, is_dgram: bool) -> Option<u16> {
    let identifier = u16::from_be_bytes([icmp[4], icmp[5]]);
    let sequence = u16::from_be_bytes([icmp[6], icmp[7]]);
    if identifier == our_identifier {
        return Some(sequence);
    }
    if is_dgram {
        return payload_identity(icmp.get(ICMP_HEADER_SIZE..)?, our_identifier);
    }
    None
}

/// Pull the sequence from a quoted echo request inside an ICMP error
fn match_quoted_request(quoted_icmp: &[u8], request_type: u8, our_identifier: u16, is_dgram: bool) -> Option<u16> {
    if quoted_icmp.len() < ICMP_HEADER_SIZE || quoted_icmp[0] != request_type {
        return None;
    }
    match_echo_identity(quoted_icmp, our_identifier, is_dgram)
}

/// Payload bytes 0-3 carry identifier and sequence (see `build_echo_request`)
fn payload_identity(payload: &[u8], our_identifier: u16) -> Option<u16> {
    if payload.len() < 4 {
        return None;
    }
    let identifier = u16::from_be_bytes([payload[0], payload[1]]);
    (identifier == our_identifier).then(|| u16::from_be_bytes([payload[2], payload[3]]))
}

/// RFC 1071 checksum check: a valid message folds to 0xFFFF
fn validate_icmp_checksum(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }

    let mut sum: u32 = data
        .chunks(2)
        .map(|chunk| match chunk {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]) as u32,
            [hi] => (*hi as u32) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    sum == 0xFFFF || sum == 0x0000
}
