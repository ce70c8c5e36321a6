//! rtnetlink messages
//!
//! Route requests are built and kernel notifications decoded with
//! `netlink-packet-route`; this module maps them to and from the daemon's own
//! types and enforces the fixed route message capacity.

use dnsroute_types::{IpAddress, IpFamily};
use netlink_packet_core::{
    Emitable, NLM_F_CREATE, NLM_F_REPLACE, NLM_F_REQUEST, NetlinkHeader, NetlinkMessage,
    NetlinkPayload,
};
use netlink_packet_route::address::{AddressAttribute, AddressMessage};
use netlink_packet_route::link::{LinkAttribute, LinkMessage};
use netlink_packet_route::route::{
    RouteAddress, RouteAttribute, RouteHeader, RouteMessage, RouteProtocol, RouteScope, RouteType,
};
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
use thiserror::Error;

// rtnetlink message types
pub const RTM_NEWROUTE: u16 = 24;
pub const RTM_DELROUTE: u16 = 25;

// Route attribute types, in the order requests carry them
pub const RTA_DST: u16 = 1;
pub const RTA_OIF: u16 = 4;
pub const RTA_GATEWAY: u16 = 5;
pub const RTA_PRIORITY: u16 = 6;
pub const RTA_TABLE: u16 = 15;

// Multicast groups (legacy RTMGRP_* bitmask)
pub const RTMGRP_LINK: u32 = 0x0001;
pub const RTMGRP_IPV4_IFADDR: u32 = 0x0010;
pub const RTMGRP_IPV4_ROUTE: u32 = 0x0040;
pub const RTMGRP_IPV6_IFADDR: u32 = 0x0100;
pub const RTMGRP_IPV6_ROUTE: u32 = 0x0400;

// Address families
pub const AF_INET: u8 = 2;
pub const AF_INET6: u8 = 10;

// rtmsg fields
pub const RT_TABLE_MAIN: u8 = RouteHeader::RT_TABLE_MAIN;
pub const RT_SCOPE_UNIVERSE: u8 = 0;
pub const RTN_UNICAST: u8 = 1;
pub const RTN_BLACKHOLE: u8 = 6;
pub const RTPROT_STATIC: u8 = 4;

// Interface flags
pub const IFF_UP: u32 = 0x1;
pub const IFF_POINTOPOINT: u32 = 0x10;
pub const IFF_RUNNING: u32 = 0x40;

pub const NLMSG_HDRLEN: usize = 16;

/// Upper bound of a route mutation message (header, rtmsg, four attributes).
pub const ROUTE_MSG_CAPACITY: usize = 128;

/// Netlink encoding and decoding failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("message buffer overflow: need {needed} bytes, capacity {capacity}")]
    BufferOverflow { needed: usize, capacity: usize },

    #[error("malformed netlink message: {0}")]
    Decode(String),

    #[error("invalid address for route message: {0}")]
    InvalidAddress(String),
}

/// Whether a route is being installed or withdrawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOp {
    Install,
    Withdraw,
}

impl RouteOp {
    fn flags(self) -> u16 {
        match self {
            RouteOp::Install => NLM_F_REQUEST | NLM_F_CREATE | NLM_F_REPLACE,
            RouteOp::Withdraw => NLM_F_REQUEST,
        }
    }
}

/// Regular route through the interface, or killswitch blackhole route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Unicast,
    Blackhole,
}

/// Host route mutation pushed to the main table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    pub op: RouteOp,
    pub kind: RouteKind,
    pub dest: IpAddress,
    /// Output interface index, unicast routes only
    pub oif: u32,
    pub metric: u32,
    /// Next hop, unicast routes only
    pub gateway: Option<IpAddress>,
}

fn route_address(ip: IpAddress) -> Option<RouteAddress> {
    match ip {
        IpAddress::V4(addr) => Some(RouteAddress::Inet(addr)),
        IpAddress::V6(addr) => Some(RouteAddress::Inet6(addr)),
        IpAddress::Invalid => None,
    }
}

fn from_route_address(addr: &RouteAddress) -> IpAddress {
    match addr {
        RouteAddress::Inet(addr) => IpAddress::from(*addr),
        RouteAddress::Inet6(addr) => IpAddress::from(*addr),
        _ => IpAddress::Invalid,
    }
}

fn family_code(family: AddressFamily) -> u8 {
    match family {
        AddressFamily::Inet => AF_INET,
        AddressFamily::Inet6 => AF_INET6,
        _ => 0,
    }
}

/// Host route `rtmsg` for the main table with static protocol.
pub fn route_header(family: IpFamily, route_type: u8) -> RouteHeader {
    let mut header = RouteHeader::default();
    header.address_family = match family {
        IpFamily::V4 => AddressFamily::Inet,
        IpFamily::V6 => AddressFamily::Inet6,
    };
    header.destination_prefix_length = family.host_prefix_len();
    header.table = RouteHeader::RT_TABLE_MAIN;
    header.protocol = RouteProtocol::Static;
    header.scope = RouteScope::Universe;
    header.kind = RouteType::from(route_type);
    header
}

/// Route request bounded by a fixed message capacity.
///
/// Every append checks the encoded size first and fails with
/// [`CodecError::BufferOverflow`], leaving the message unchanged.
#[derive(Debug, Clone)]
pub struct RouteMessageBuilder {
    op: RouteOp,
    seq: u32,
    message: RouteMessage,
    capacity: usize,
}

impl RouteMessageBuilder {
    pub fn new(
        op: RouteOp,
        header: RouteHeader,
        seq: u32,
        capacity: usize,
    ) -> Result<Self, CodecError> {
        let mut message = RouteMessage::default();
        message.header = header;
        let builder = Self {
            op,
            seq,
            message,
            capacity,
        };
        builder.check(builder.len())?;
        Ok(builder)
    }

    /// Appends one route attribute.
    pub fn push(&mut self, attribute: RouteAttribute) -> Result<(), CodecError> {
        self.check(self.len() + attribute.buffer_len())?;
        self.message.attributes.push(attribute);
        Ok(())
    }

    /// Encoded size of the message so far, netlink header included
    pub fn len(&self) -> usize {
        NLMSG_HDRLEN + self.message.buffer_len()
    }

    pub fn is_empty(&self) -> bool {
        self.message.attributes.is_empty()
    }

    /// Serializes the request with `nlmsg_len` and type filled in.
    pub fn finish(self) -> Vec<u8> {
        let mut header = NetlinkHeader::default();
        header.flags = self.op.flags();
        header.sequence_number = self.seq;
        let payload = match self.op {
            RouteOp::Install => RouteNetlinkMessage::NewRoute(self.message),
            RouteOp::Withdraw => RouteNetlinkMessage::DelRoute(self.message),
        };
        let mut packet = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(payload));
        packet.finalize();

        let mut buf = vec![0u8; packet.buffer_len()];
        packet.serialize(&mut buf);
        buf
    }

    fn check(&self, needed: usize) -> Result<(), CodecError> {
        if needed > self.capacity {
            return Err(CodecError::BufferOverflow {
                needed,
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

/// Encodes an `RTM_NEWROUTE` / `RTM_DELROUTE` request for `spec`.
///
/// Attributes are emitted as destination, output interface (unicast),
/// priority, gateway (unicast, when set).
pub fn encode_route(spec: &RouteSpec, seq: u32) -> Result<Vec<u8>, CodecError> {
    let invalid = || CodecError::InvalidAddress(spec.dest.to_string());
    let family = spec.dest.family().ok_or_else(invalid)?;
    let dest = route_address(spec.dest).ok_or_else(invalid)?;

    let route_type = match spec.kind {
        RouteKind::Unicast => RTN_UNICAST,
        RouteKind::Blackhole => RTN_BLACKHOLE,
    };
    let mut builder = RouteMessageBuilder::new(
        spec.op,
        route_header(family, route_type),
        seq,
        ROUTE_MSG_CAPACITY,
    )?;
    builder.push(RouteAttribute::Destination(dest))?;
    if spec.kind == RouteKind::Unicast {
        builder.push(RouteAttribute::Oif(spec.oif))?;
    }
    builder.push(RouteAttribute::Priority(spec.metric))?;
    if spec.kind == RouteKind::Unicast {
        if let Some(gateway) = spec.gateway {
            let next_hop = route_address(gateway)
                .filter(|_| gateway.family() == Some(family))
                .ok_or_else(|| {
                    CodecError::InvalidAddress(format!(
                        "gateway {} does not match destination {}",
                        gateway, spec.dest
                    ))
                })?;
            builder.push(RouteAttribute::Gateway(next_hop))?;
        }
    }
    Ok(builder.finish())
}

/// New or deleted object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    New,
    Del,
}

/// Decoded `RTM_NEWLINK` / `RTM_DELLINK`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub change: Change,
    pub index: u32,
    pub flags: u32,
    pub name: Option<String>,
}

impl LinkEvent {
    /// Administratively up with carrier
    pub fn is_running(&self) -> bool {
        self.flags & IFF_UP != 0 && self.flags & IFF_RUNNING != 0
    }

    pub fn is_ptp(&self) -> bool {
        self.flags & IFF_POINTOPOINT != 0
    }
}

/// Decoded `RTM_NEWADDR` / `RTM_DELADDR`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressEvent {
    pub change: Change,
    pub family: u8,
    pub prefix_len: u8,
    pub index: u32,
    /// IFA_LOCAL
    pub local: Option<IpAddress>,
    /// IFA_ADDRESS (peer address on point-to-point links)
    pub address: Option<IpAddress>,
    /// IFA_BROADCAST
    pub broadcast: Option<IpAddress>,
}

/// Decoded `RTM_NEWROUTE` / `RTM_DELROUTE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEvent {
    pub change: Change,
    pub family: u8,
    pub dst_len: u8,
    pub table: u32,
    pub protocol: u8,
    pub scope: u8,
    pub route_type: u8,
    pub dest: Option<IpAddress>,
    pub oif: Option<u32>,
    pub priority: Option<u32>,
    pub gateway: Option<IpAddress>,
}

/// One message of a received datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelEvent {
    Link(LinkEvent),
    Address(AddressEvent),
    Route(RouteEvent),
    /// End of a multipart message
    Done,
    /// `NLMSG_ERROR`; `errno` is positive, 0 is an acknowledgement
    Error { errno: i32 },
    /// Any other message type
    Other { msg_type: u16 },
}

/// Iterates the messages of one netlink datagram.
pub fn parse_datagram(buf: &[u8]) -> MessageIter<'_> {
    MessageIter {
        buf,
        offset: 0,
        failed: false,
    }
}

/// Iterator returned by [`parse_datagram`]; stops after the first malformed message.
pub struct MessageIter<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl Iterator for MessageIter<'_> {
    type Item = Result<KernelEvent, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset + NLMSG_HDRLEN > self.buf.len() {
            return None;
        }
        let msg =
            match NetlinkMessage::<RouteNetlinkMessage>::deserialize(&self.buf[self.offset..]) {
                Ok(msg) if msg.header.length as usize >= NLMSG_HDRLEN => msg,
                Ok(msg) => {
                    self.failed = true;
                    return Some(Err(CodecError::Decode(format!(
                        "nlmsg_len {} shorter than header",
                        msg.header.length
                    ))));
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(CodecError::Decode(e.to_string())));
                }
            };
        // 4 byte netlink alignment
        self.offset += (msg.header.length as usize + 3) & !3;
        Some(Ok(kernel_event(msg)))
    }
}

fn kernel_event(msg: NetlinkMessage<RouteNetlinkMessage>) -> KernelEvent {
    let msg_type = msg.header.message_type;
    match msg.payload {
        NetlinkPayload::Done(_) => KernelEvent::Done,
        NetlinkPayload::Error(err) => KernelEvent::Error {
            errno: -err.raw_code(),
        },
        NetlinkPayload::InnerMessage(inner) => match inner {
            RouteNetlinkMessage::NewLink(link) => KernelEvent::Link(link_event(Change::New, link)),
            RouteNetlinkMessage::DelLink(link) => KernelEvent::Link(link_event(Change::Del, link)),
            RouteNetlinkMessage::NewAddress(addr) => {
                KernelEvent::Address(address_event(Change::New, addr))
            }
            RouteNetlinkMessage::DelAddress(addr) => {
                KernelEvent::Address(address_event(Change::Del, addr))
            }
            RouteNetlinkMessage::NewRoute(route) => {
                KernelEvent::Route(route_event(Change::New, route))
            }
            RouteNetlinkMessage::DelRoute(route) => {
                KernelEvent::Route(route_event(Change::Del, route))
            }
            _ => KernelEvent::Other { msg_type },
        },
        _ => KernelEvent::Other { msg_type },
    }
}

fn link_event(change: Change, link: LinkMessage) -> LinkEvent {
    let name = link.attributes.into_iter().find_map(|attr| match attr {
        LinkAttribute::IfName(name) => Some(name),
        _ => None,
    });
    LinkEvent {
        change,
        index: link.header.index,
        flags: link.header.flags.bits(),
        name,
    }
}

fn address_event(change: Change, addr: AddressMessage) -> AddressEvent {
    let mut event = AddressEvent {
        change,
        family: family_code(addr.header.family),
        prefix_len: addr.header.prefix_len,
        index: addr.header.index,
        local: None,
        address: None,
        broadcast: None,
    };
    for attr in &addr.attributes {
        match attr {
            AddressAttribute::Local(ip) => event.local = Some(IpAddress::from(*ip)),
            AddressAttribute::Address(ip) => event.address = Some(IpAddress::from(*ip)),
            AddressAttribute::Broadcast(ip) => event.broadcast = Some(IpAddress::from(*ip)),
            _ => {}
        }
    }
    event
}

fn route_event(change: Change, route: RouteMessage) -> RouteEvent {
    let RouteMessage { header, attributes, .. } = route;
    let mut event = RouteEvent {
        change,
        family: family_code(header.address_family),
        dst_len: header.destination_prefix_length,
        table: u32::from(header.table),
        protocol: u8::from(header.protocol),
        scope: u8::from(header.scope),
        route_type: u8::from(header.kind),
        dest: None,
        oif: None,
        priority: None,
        gateway: None,
    };
    // RTA_TABLE carries tables above 255 and wins over the header byte
    for attr in &attributes {
        match attr {
            RouteAttribute::Destination(addr) => event.dest = Some(from_route_address(addr)),
            RouteAttribute::Gateway(addr) => event.gateway = Some(from_route_address(addr)),
            RouteAttribute::Oif(index) => event.oif = Some(*index),
            RouteAttribute::Priority(metric) => event.priority = Some(*metric),
            RouteAttribute::Table(table) => event.table = *table,
            _ => {}
        }
    }
    event
}


#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{ByteOrder, NativeEndian};
    use pretty_assertions::assert_eq;

    const RTMSG_LEN: usize = 12;

    fn ip(s: &str) -> IpAddress {
        s.parse().unwrap()
    }

    fn unicast_install(dest: &str, gateway: Option<&str>) -> RouteSpec {
        RouteSpec {
            op: RouteOp::Install,
            kind: RouteKind::Unicast,
            dest: ip(dest),
            oif: 7,
            metric: 100,
            gateway: gateway.map(ip),
        }
    }

    /// Attribute types in wire order
    fn attribute_kinds(msg: &[u8]) -> Vec<u16> {
        let mut kinds = Vec::new();
        let mut offset = NLMSG_HDRLEN + RTMSG_LEN;
        while offset + 4 <= msg.len() {
            let len = NativeEndian::read_u16(&msg[offset..offset + 2]) as usize;
            kinds.push(NativeEndian::read_u16(&msg[offset + 2..offset + 4]));
            offset += (len + 3) & !3;
        }
        kinds
    }

    #[test]
    fn test_install_unicast_v4_layout() {
        let msg = encode_route(&unicast_install("1.2.3.4", Some("10.0.0.1")), 42).unwrap();

        // hdr 16 + rtmsg 12 + dst 8 + oif 8 + prio 8 + gw 8
        assert_eq!(msg.len(), 60);
        assert_eq!(NativeEndian::read_u32(&msg[0..4]), 60);
        assert_eq!(NativeEndian::read_u16(&msg[4..6]), RTM_NEWROUTE);
        assert_eq!(
            NativeEndian::read_u16(&msg[6..8]),
            NLM_F_REQUEST | NLM_F_CREATE | NLM_F_REPLACE
        );
        assert_eq!(NativeEndian::read_u32(&msg[8..12]), 42);
        assert_eq!(NativeEndian::read_u32(&msg[12..16]), 0);

        assert_eq!(
            &msg[16..28],
            &[
                AF_INET,
                32,
                0,
                0,
                RT_TABLE_MAIN,
                RTPROT_STATIC,
                RT_SCOPE_UNIVERSE,
                RTN_UNICAST,
                0,
                0,
                0,
                0
            ]
        );

        // RTA_DST
        assert_eq!(NativeEndian::read_u16(&msg[28..30]), 8);
        assert_eq!(NativeEndian::read_u16(&msg[30..32]), RTA_DST);
        assert_eq!(&msg[32..36], &[1, 2, 3, 4]);
        // RTA_OIF
        assert_eq!(NativeEndian::read_u16(&msg[38..40]), RTA_OIF);
        assert_eq!(NativeEndian::read_u32(&msg[40..44]), 7);
        // RTA_PRIORITY
        assert_eq!(NativeEndian::read_u16(&msg[46..48]), RTA_PRIORITY);
        assert_eq!(NativeEndian::read_u32(&msg[48..52]), 100);
        // RTA_GATEWAY
        assert_eq!(NativeEndian::read_u16(&msg[54..56]), RTA_GATEWAY);
        assert_eq!(&msg[56..60], &[10, 0, 0, 1]);
    }

    #[test]
    fn test_blackhole_has_no_oif_or_gateway() {
        let spec = RouteSpec {
            op: RouteOp::Install,
            kind: RouteKind::Blackhole,
            dest: ip("1.2.3.4"),
            oif: 7,
            metric: 101,
            gateway: Some(ip("10.0.0.1")),
        };
        let msg = encode_route(&spec, 1).unwrap();
        assert_eq!(msg.len(), NLMSG_HDRLEN + RTMSG_LEN + 8 + 8);
        assert_eq!(msg[16 + 7], RTN_BLACKHOLE);
        assert_eq!(attribute_kinds(&msg), vec![RTA_DST, RTA_PRIORITY]);
    }

    #[test]
    fn test_withdraw_flags() {
        let mut spec = unicast_install("1.2.3.4", None);
        spec.op = RouteOp::Withdraw;
        let msg = encode_route(&spec, 3).unwrap();
        assert_eq!(NativeEndian::read_u16(&msg[4..6]), RTM_DELROUTE);
        assert_eq!(NativeEndian::read_u16(&msg[6..8]), NLM_F_REQUEST);
        assert_eq!(attribute_kinds(&msg), vec![RTA_DST, RTA_OIF, RTA_PRIORITY]);
    }

    #[test]
    fn test_install_v6_prefix_and_length() {
        let msg = encode_route(&unicast_install("2001:db8::1", Some("2001:db8::fe")), 9).unwrap();
        assert_eq!(msg[16], AF_INET6);
        assert_eq!(msg[17], 128);
        // hdr 16 + rtmsg 12 + dst 20 + oif 8 + prio 8 + gw 20
        assert_eq!(msg.len(), 84);
        assert!(msg.len() <= ROUTE_MSG_CAPACITY);
    }

    #[test]
    fn test_invalid_destination_rejected() {
        let spec = RouteSpec {
            op: RouteOp::Install,
            kind: RouteKind::Blackhole,
            dest: IpAddress::Invalid,
            oif: 0,
            metric: 1,
            gateway: None,
        };
        assert!(matches!(
            encode_route(&spec, 0),
            Err(CodecError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_gateway_family_mismatch_rejected() {
        let spec = unicast_install("1.2.3.4", Some("2001:db8::1"));
        assert!(matches!(
            encode_route(&spec, 0),
            Err(CodecError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_builder_overflow_is_an_error() {
        let header = route_header(IpFamily::V4, RTN_UNICAST);
        // netlink header, rtmsg and one u32 attribute
        let mut builder = RouteMessageBuilder::new(RouteOp::Install, header, 0, 36).unwrap();
        assert_eq!(builder.len(), NLMSG_HDRLEN + RTMSG_LEN);
        assert!(builder.is_empty());
        assert!(builder.push(RouteAttribute::Oif(1)).is_ok());
        assert_eq!(
            builder.push(RouteAttribute::Priority(1)),
            Err(CodecError::BufferOverflow {
                needed: 44,
                capacity: 36
            })
        );
        // failed append leaves the message intact
        assert_eq!(builder.len(), 36);
        assert_eq!(builder.finish().len(), 36);
    }

    #[test]
    fn test_builder_header_needs_capacity() {
        let header = route_header(IpFamily::V4, RTN_BLACKHOLE);
        assert_eq!(
            RouteMessageBuilder::new(RouteOp::Withdraw, header, 0, 20).unwrap_err(),
            CodecError::BufferOverflow {
                needed: 28,
                capacity: 20
            }
        );
    }

    #[test]
    fn test_decode_route_fields() {
        let msg = encode_route(&unicast_install("1.2.3.4", Some("10.0.0.1")), 5).unwrap();
        let events: Vec<_> = parse_datagram(&msg).collect();
        assert_eq!(events.len(), 1);
        let KernelEvent::Route(route) = events[0].clone().unwrap() else {
            panic!("expected route event");
        };
        assert_eq!(route.change, Change::New);
        assert_eq!(route.family, AF_INET);
        assert_eq!(route.dst_len, 32);
        assert_eq!(route.table, u32::from(RT_TABLE_MAIN));
        assert_eq!(route.protocol, RTPROT_STATIC);
        assert_eq!(route.scope, RT_SCOPE_UNIVERSE);
        assert_eq!(route.route_type, RTN_UNICAST);
        assert_eq!(route.dest, Some(ip("1.2.3.4")));
        assert_eq!(route.oif, Some(7));
        assert_eq!(route.priority, Some(100));
        assert_eq!(route.gateway, Some(ip("10.0.0.1")));
    }

    #[test]
    fn test_decode_multiple_messages() {
        let mut datagram = fixtures::link(Change::New, 3, IFF_UP | IFF_RUNNING, Some("tun0"));
        datagram.extend(fixtures::address(
            Change::Del,
            3,
            Some(ip("10.0.0.2")),
            Some(ip("10.0.0.1")),
            None,
        ));
        datagram.extend(fixtures::done());

        let events: Vec<_> = parse_datagram(&datagram).map(Result::unwrap).collect();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            KernelEvent::Link(LinkEvent {
                change: Change::New,
                index: 3,
                flags: IFF_UP | IFF_RUNNING,
                name: Some("tun0".to_string()),
            })
        );
        let KernelEvent::Address(addr) = &events[1] else {
            panic!("expected address event");
        };
        assert_eq!(addr.change, Change::Del);
        assert_eq!(addr.family, AF_INET);
        assert_eq!(addr.index, 3);
        assert_eq!(addr.local, Some(ip("10.0.0.2")));
        assert_eq!(addr.address, Some(ip("10.0.0.1")));
        assert_eq!(addr.broadcast, None);
        assert_eq!(events[2], KernelEvent::Done);
    }

    #[test]
    fn test_decode_broadcast_address() {
        let msg = fixtures::address(
            Change::New,
            3,
            Some(ip("10.0.0.2")),
            Some(ip("10.0.0.2")),
            Some(ip("10.0.0.255")),
        );
        let Some(Ok(KernelEvent::Address(addr))) = parse_datagram(&msg).next() else {
            panic!("expected address event");
        };
        assert_eq!(addr.broadcast, Some(ip("10.0.0.255")));
    }

    #[test]
    fn test_decode_error_message() {
        let events: Vec<_> = parse_datagram(&fixtures::error(libc::EEXIST)).collect();
        assert_eq!(events, vec![Ok(KernelEvent::Error { errno: libc::EEXIST })]);
    }

    #[test]
    fn test_decode_unknown_type() {
        let events: Vec<_> = parse_datagram(&fixtures::noop()).collect();
        assert_eq!(events, vec![Ok(KernelEvent::Other { msg_type: 1 })]);
    }

    #[test]
    fn test_decode_truncated_header_stops() {
        let mut datagram = fixtures::done();
        // claims 64 bytes but far fewer follow
        let mut bogus = fixtures::done();
        NativeEndian::write_u32(&mut bogus[0..4], 64);
        datagram.extend(bogus);
        datagram.extend(fixtures::done());

        let events: Vec<_> = parse_datagram(&datagram).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Ok(KernelEvent::Done));
        assert!(matches!(events[1], Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_decode_short_family_header() {
        // RTM_NEWROUTE carrying 4 bytes instead of a full rtmsg
        let mut msg = vec![0u8; NLMSG_HDRLEN + 4];
        NativeEndian::write_u32(&mut msg[0..4], (NLMSG_HDRLEN + 4) as u32);
        NativeEndian::write_u16(&mut msg[4..6], RTM_NEWROUTE);
        msg[NLMSG_HDRLEN] = AF_INET;
        msg[NLMSG_HDRLEN + 1] = 32;

        let events: Vec<_> = parse_datagram(&msg).collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_rta_table_overrides_header() {
        let mut msg = encode_route(&unicast_install("1.2.3.4", None), 0).unwrap();
        let mut attr = [0u8; 8];
        NativeEndian::write_u16(&mut attr[0..2], 8);
        NativeEndian::write_u16(&mut attr[2..4], RTA_TABLE);
        NativeEndian::write_u32(&mut attr[4..8], 1000);
        msg.extend_from_slice(&attr);
        let len = msg.len() as u32;
        NativeEndian::write_u32(&mut msg[0..4], len);

        let Some(Ok(KernelEvent::Route(route))) = parse_datagram(&msg).next() else {
            panic!("expected route event");
        };
        assert_eq!(route.table, 1000);
    }
}
