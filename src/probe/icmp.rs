use pnet::packet::MutablePacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpType, IcmpTypes, checksum};

/// ICMP header size (fixed)
pub const ICMP_HEADER_SIZE: usize = 8;
/// Minimum payload: identifier, sequence and a 32-bit timestamp
pub const MIN_PAYLOAD_SIZE: usize = 8;
/// ICMPv6 Echo Request type
pub const ICMPV6_ECHO_REQUEST: u8 = 128;

/// Process-derived base for the ICMP identifier field
pub fn process_identifier() -> u16 {
    std::process::id() as u16
}

/// Build an ICMP (or ICMPv6) Echo Request
///
/// Payload layout:
/// - Bytes 0-1: identifier (DGRAM sockets may rewrite the header copy)
/// - Bytes 2-3: sequence
/// - Bytes 4-7: send timestamp, lower 32 bits of microseconds
/// - Bytes 8+: pattern fill
///
/// The ICMPv6 checksum is left zero; the kernel fills it in.
pub fn build_echo_request(identifier: u16, sequence: u16, payload_size: usize, ipv6: bool) -> Vec<u8> {
    let payload_size = payload_size.max(MIN_PAYLOAD_SIZE);
    let mut buffer = vec![0u8; ICMP_HEADER_SIZE + payload_size];

    // Buffer is always at least header-sized
    if let Some(mut packet) = MutableEchoRequestPacket::new(&mut buffer) {
        if ipv6 {
            packet.set_icmp_type(IcmpType::new(ICMPV6_ECHO_REQUEST));
        } else {
            packet.set_icmp_type(IcmpTypes::EchoRequest);
        }
        packet.set_icmp_code(IcmpCode::new(0));
        packet.set_identifier(identifier);
        packet.set_sequence_number(sequence);

        let payload = packet.payload_mut();
        payload[0..2].copy_from_slice(&identifier.to_be_bytes());
        payload[2..4].copy_from_slice(&sequence.to_be_bytes());

        let micros = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_micros() as u32)
            .unwrap_or_default();
        payload[4..8].copy_from_slice(&micros.to_be_bytes());

        for (i, byte) in payload[8..].iter_mut().enumerate() {
            *byte = (i & 0xFF) as u8;
        }
    }

    if !ipv6 {
        let cksum = IcmpPacket::new(&buffer).map(|p| checksum(&p));
        if let (Some(cksum), Some(mut packet)) = (cksum, MutableEchoRequestPacket::new(&mut buffer)) {
            packet.set_checksum(cksum);
        }
    }

    buffer
}
