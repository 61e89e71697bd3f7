//! mDNS service discovery module
//!
//! Advertises `<hostname>._http._tcp.local.` and `<hostname>.local.` so the
//! status page can be found without knowing the DHCP address. Records and
//! replies come from edge-mdns; this module only moves packets over the
//! embassy-net UDP socket.

use core::net::{Ipv4Addr, Ipv6Addr};

use crate::{BoardError, config};
use edge_mdns::domain::base::Ttl;
use edge_mdns::host::{Host, Service, ServiceAnswers};
use edge_mdns::{HostAnswersMdnsHandler, MdnsHandler, MdnsRequest, MdnsResponse};
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpAddress, IpEndpoint, Stack};
use embassy_time::{Duration, Instant, Timer, with_timeout};
use log::{debug, info, warn};

/// mDNS UDP port
pub const MDNS_PORT: u16 = 5353;

/// mDNS IPv4 multicast group
pub const MDNS_GROUP: [u8; 4] = [224, 0, 0, 251];

/// Record TTL in announcements
pub const RECORD_TTL_SECS: u32 = 120;

const PACKET_CAPACITY: usize = 512;

/// Shared-record replies to multicast queries wait 20-120 ms
const REPLY_DELAY_MIN_MS: u64 = 20;
const REPLY_DELAY_SPREAD_MS: u64 = 100;

/// Reply ready to go out
#[derive(Debug, PartialEq, Eq)]
pub struct Reply<'b> {
    pub data: &'b [u8],
    /// Send after a short random delay
    pub delay: bool,
}

/// The host and HTTP service records for one address
pub struct Advertisement<'a> {
    host: Host<'a>,
    service: Service<'a>,
}

impl<'a> Advertisement<'a> {
    pub fn new(hostname: &'a str, ipv4: Ipv4Addr, port: u16) -> Self {
        Self {
            host: Host {
                hostname,
                ipv4,
                ipv6: Ipv6Addr::UNSPECIFIED,
                ttl: Ttl::from_secs(RECORD_TTL_SECS),
            },
            service: Service {
                name: hostname,
                priority: 0,
                weight: 0,
                service: "_http",
                protocol: "_tcp",
                port,
                service_subtypes: &[],
                txt_kvs: &[],
            },
        }
    }

    fn handle<'b>(
        &self,
        request: MdnsRequest<'_>,
        buf: &'b mut [u8],
    ) -> Result<Option<Reply<'b>>, BoardError> {
        let mut handler =
            HostAnswersMdnsHandler::new(ServiceAnswers::new(&self.host, &self.service));

        match handler.handle(request, buf) {
            Ok(MdnsResponse::Reply { data, delay }) => Ok(Some(Reply { data, delay })),
            Ok(MdnsResponse::None) => Ok(None),
            Err(_) => Err(BoardError::Mdns),
        }
    }

    /// Unsolicited announcement carrying every record
    pub fn announce<'b>(&self, buf: &'b mut [u8]) -> Result<&'b [u8], BoardError> {
        match self.handle(MdnsRequest::None, buf)? {
            Some(reply) => Ok(reply.data),
            None => Err(BoardError::Mdns),
        }
    }

    /// Answer an incoming packet, `None` when it asks about nothing we own.
    ///
    /// `legacy` marks a one-shot resolver (source port other than 5353),
    /// whose reply echoes the query id and question. `multicast` tells
    /// whether the query arrived on the group.
    pub fn answer<'b>(
        &self,
        query: &[u8],
        legacy: bool,
        multicast: bool,
        buf: &'b mut [u8],
    ) -> Result<Option<Reply<'b>>, BoardError> {
        self.handle(
            MdnsRequest::Request {
                legacy,
                multicast,
                data: query,
            },
            buf,
        )
    }
}

fn reply_delay() -> Duration {
    let jitter = Instant::now().as_ticks() % REPLY_DELAY_SPREAD_MS;
    Duration::from_millis(REPLY_DELAY_MIN_MS + jitter)
}

/// Advertise the HTTP service forever, rebuilding after address changes
pub async fn run_responder(stack: Stack<'_>, hostname: &str, port: u16) -> ! {
    let mut rx_buffer = [0u8; PACKET_CAPACITY];
    let mut tx_buffer = [0u8; PACKET_CAPACITY];
    let mut rx_meta = [PacketMetadata::EMPTY; 4];
    let mut tx_meta = [PacketMetadata::EMPTY; 4];
    let mut query = [0u8; PACKET_CAPACITY];
    let mut reply = [0u8; PACKET_CAPACITY];

    let [a, b, c, d] = MDNS_GROUP;
    let group_addr = IpAddress::v4(a, b, c, d);
    let group = IpEndpoint::new(group_addr, MDNS_PORT);

    loop {
        stack.wait_config_up().await;
        let Some(v4) = stack.config_v4() else {
            Timer::after(Duration::from_secs(1)).await;
            continue;
        };
        let ip = v4.address.address().octets();

        if let Err(e) = stack.join_multicast_group(group_addr) {
            warn!("[MDNS] Failed to join multicast group: {:?}", e);
        }

        let mut socket = UdpSocket::new(
            stack,
            &mut rx_meta,
            &mut rx_buffer,
            &mut tx_meta,
            &mut tx_buffer,
        );
        if let Err(e) = socket.bind(MDNS_PORT) {
            warn!("[MDNS] Failed to bind port {}: {:?}", MDNS_PORT, e);
            Timer::after(Duration::from_secs(config::MDNS_ANNOUNCE_INTERVAL_SECS)).await;
            continue;
        }

        let advertisement = Advertisement::new(hostname, Ipv4Addr::from(ip), port);
        info!(
            "[MDNS] Advertising {}._http._tcp.local at {}.{}.{}.{}:{}",
            hostname, ip[0], ip[1], ip[2], ip[3], port
        );

        let mut next_announce = Instant::now();
        while stack.config_v4().map(|c| c.address.address().octets()) == Some(ip) {
            if Instant::now() >= next_announce {
                match advertisement.announce(&mut reply) {
                    Ok(packet) => match socket.send_to(packet, group).await {
                        Ok(()) => debug!("[MDNS] Announcement sent"),
                        Err(e) => warn!("[MDNS] Announcement failed: {:?}", e),
                    },
                    Err(e) => warn!("[MDNS] Cannot advertise '{}': {}", hostname, e),
                }
                next_announce =
                    Instant::now() + Duration::from_secs(config::MDNS_ANNOUNCE_INTERVAL_SECS);
            }

            let wait = next_announce.saturating_duration_since(Instant::now());
            let (len, meta) = match with_timeout(wait, socket.recv_from(&mut query)).await {
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    debug!("[MDNS] Receive error: {:?}", e);
                    continue;
                }
                Err(_) => continue,
            };

            let legacy = meta.endpoint.port != MDNS_PORT;
            let multicast = meta.local_address == Some(group_addr);
            let answer = match advertisement.answer(&query[..len], legacy, multicast, &mut reply) {
                Ok(Some(answer)) => answer,
                Ok(None) => continue,
                Err(e) => {
                    debug!("[MDNS] Unusable packet from {:?}: {}", meta.endpoint, e);
                    continue;
                }
            };

            // one-shot resolvers and direct queries expect a unicast reply
            let to = if legacy || !multicast {
                meta.endpoint
            } else {
                group
            };
            if answer.delay && to == group {
                Timer::after(reply_delay()).await;
            }
            match socket.send_to(answer.data, to).await {
                Ok(()) => debug!("[MDNS] Answered query from {:?}", meta.endpoint),
                Err(e) => warn!("[MDNS] Reply failed: {:?}", e),
            }
        }

        info!("[MDNS] Address changed, restarting advertisement");
    }
}
