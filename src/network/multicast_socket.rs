//! The UDP socket sessions open by default: a multicast group member, or a broadcast
//! sender when `TransportConfig::broadcast` is set.

use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket},
};

use crate::sessions::config::TransportConfig;
use crate::DatagramSocket;

/// A [`DatagramSocket`] over a std [`UdpSocket`] bound to `0.0.0.0:port`.
///
/// In multicast mode the socket joins the configured group on the default interface and
/// sends to `group:port`. In broadcast mode it enables `SO_BROADCAST` and sends to the
/// configured address (normally `255.255.255.255`).
///
/// Receives block for at most the configured receive timeout.
///
/// The port is not bound with `SO_REUSEADDR`, so only one process per host can listen on
/// it. Two peers on one host need distinct ports, or an in-memory socket.
#[derive(Debug)]
pub struct MulticastSocket {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl MulticastSocket {
    /// Binds and configures a socket as described by `config`.
    ///
    /// # Errors
    ///
    /// Any I/O error of binding, joining or setting socket options. A group that does not
    /// resolve to an IPv4 address is [`io::ErrorKind::AddrNotAvailable`]; a non-multicast
    /// group outside broadcast mode is [`io::ErrorKind::InvalidInput`].
    pub fn open(config: &TransportConfig) -> io::Result<Self> {
        let group = resolve_group(&config.group, config.port)?;

        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port);
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_read_timeout(Some(config.receive_timeout))?;

        if config.broadcast {
            socket.set_broadcast(true)?;
        } else {
            if !group.is_multicast() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{group} is not a multicast address"),
                ));
            }
            socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
            socket.set_multicast_loop_v4(!config.loopback_disabled)?;
        }

        // A port of 0 binds an ephemeral port; send to wherever we actually listen.
        let port = match config.port {
            0 => socket.local_addr()?.port(),
            port => port,
        };

        tracing::debug!(
            group = %group,
            port,
            broadcast = config.broadcast,
            "multicast socket opened"
        );

        Ok(Self {
            socket,
            destination: SocketAddr::V4(SocketAddrV4::new(group, port)),
        })
    }

    /// Where datagrams are sent.
    #[must_use]
    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// The local address the socket is bound to.
    ///
    /// # Errors
    ///
    /// Forwards the error of [`UdpSocket::local_addr`].
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl DatagramSocket for MulticastSocket {
    fn send_datagram(&self, datagram: &[u8]) -> io::Result<usize> {
        self.socket.send_to(datagram, self.destination)
    }

    fn recv_datagram(&self, buffer: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.socket.recv_from(buffer) {
                Ok((len, _)) => return Ok(len),
                // datagram sockets sometimes report an earlier send's ICMP error here
                Err(err) if err.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(err) => return Err(err),
            }
        }
    }
}

fn resolve_group(group: &str, port: u16) -> io::Result<Ipv4Addr> {
    if let Ok(addr) = group.parse::<Ipv4Addr>() {
        return Ok(addr);
    }
    (group, port)
        .to_socket_addrs()?
        .find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(*v4.ip()),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{group} does not resolve to an IPv4 address"),
            )
        })
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use web_time::Duration;

    fn loopback_broadcast() -> TransportConfig {
        // Broadcast mode towards 127.0.0.1 works without any multicast routing.
        TransportConfig {
            group: "127.0.0.1".to_owned(),
            port: 0,
            broadcast: true,
            receive_timeout: Duration::from_millis(10),
            ..TransportConfig::default()
        }
    }

    #[test]
    fn resolve_group_accepts_literals_and_names() {
        assert_eq!(
            resolve_group("239.168.0.1", 5500).unwrap(),
            Ipv4Addr::new(239, 168, 0, 1)
        );
        #[cfg(not(miri))]
        assert_eq!(
            resolve_group("localhost", 5500).unwrap(),
            Ipv4Addr::LOCALHOST
        );
    }

    #[test]
    #[cfg(not(miri))] // Miri cannot execute foreign functions like socket()
    fn open_rejects_unicast_group_outside_broadcast_mode() {
        let config = TransportConfig {
            group: "127.0.0.1".to_owned(),
            port: 0,
            ..TransportConfig::default()
        };
        let err = MulticastSocket::open(&config).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    #[cfg(not(miri))]
    fn open_reports_unresolvable_group() {
        let config = TransportConfig {
            group: "no-such-host.invalid".to_owned(),
            port: 0,
            ..loopback_broadcast()
        };
        assert!(MulticastSocket::open(&config).is_err());
    }

    #[test]
    #[cfg(not(miri))]
    fn receive_times_out_as_would_block() {
        let socket = MulticastSocket::open(&loopback_broadcast()).unwrap();
        let mut buffer = [0u8; 64];
        let err = socket.recv_datagram(&mut buffer).unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ));
    }

    #[test]
    #[cfg(not(miri))]
    fn ephemeral_port_sends_to_itself() {
        let socket = MulticastSocket::open(&loopback_broadcast()).unwrap();
        let port = socket.local_addr().unwrap().port();
        assert_ne!(port, 0);
        assert_eq!(socket.destination().port(), port);

        socket.send_datagram(&[5, 1, 2, 3]).unwrap();
        let mut buffer = [0u8; 64];
        let mut received = None;
        for _ in 0..50 {
            if let Ok(len) = socket.recv_datagram(&mut buffer) {
                received = Some(buffer[..len].to_vec());
                break;
            }
        }
        assert_eq!(received.as_deref(), Some(&[5u8, 1, 2, 3][..]));
    }

    #[test]
    #[cfg(not(miri))]
    #[ignore = "needs a network interface with multicast routing"]
    fn multicast_loopback_delivers_own_datagrams() {
        let config = TransportConfig {
            port: 0,
            ..TransportConfig::localhost_test(0)
        };
        let socket = MulticastSocket::open(&config).unwrap();
        socket.send_datagram(&[1, 2]).unwrap();
        let mut buffer = [0u8; 8];
        let len = socket.recv_datagram(&mut buffer).unwrap();
        assert_eq!(&buffer[..len], &[1, 2]);
    }
}
