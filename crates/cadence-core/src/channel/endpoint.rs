//! Channel establishment on localhost TCP.
//!
//! The owning side binds `127.0.0.1:0`, publishes the OS-assigned address
//! through the readiness handshake, and accepts one connection per peer
//! rank. The remote side connects with a bounded timeout once it has
//! discovered the address.

use super::protocol::{self, Message};
use crate::config::TimingConfig;
use crate::{CadenceError, Result};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

/// Listening end of a channel, bound to an OS-assigned port.
pub struct ChannelListener {
    listener: TcpListener,
    address: String,
}

impl ChannelListener {
    /// Bind on localhost with an OS-assigned port.
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?.to_string();
        info!("channel listening on {address}");
        Ok(Self { listener, address })
    }

    /// The address peers connect to. This is what gets published.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Accept a single peer.
    pub async fn accept(&self) -> Result<DataChannel> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true).ok();
        debug!("accepted peer {peer}");
        Ok(DataChannel { stream, peer })
    }

    /// Accept one connection per peer rank.
    pub async fn accept_ranks(&self, ranks: usize) -> Result<Vec<DataChannel>> {
        let mut peers = Vec::with_capacity(ranks);
        for _ in 0..ranks {
            peers.push(self.accept().await?);
        }
        Ok(peers)
    }
}

/// One established, bidirectional message connection.
pub struct DataChannel {
    stream: TcpStream,
    peer: SocketAddr,
}

impl DataChannel {
    /// Connect to a published channel address.
    pub async fn connect(address: &str) -> Result<Self> {
        let addr: SocketAddr =
            address
                .trim()
                .parse()
                .map_err(|_| CadenceError::InvalidAddress {
                    address: address.to_string(),
                    message: "expected host:port".to_string(),
                })?;

        let stream = tokio::time::timeout(TimingConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| CadenceError::ConnectFailed {
                address: address.to_string(),
                message: format!("no answer within {:?}", TimingConfig::CONNECT_TIMEOUT),
            })?
            .map_err(|e| CadenceError::ConnectFailed {
                address: address.to_string(),
                message: e.to_string(),
            })?;
        stream.set_nodelay(true).ok();

        debug!("connected to {addr}");
        Ok(Self { stream, peer: addr })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send one message. For `Data`, returns once the receiver has
    /// acknowledged and the payload is written out.
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        protocol::write_message(&mut self.stream, message).await
    }

    /// Receive the next message.
    ///
    /// A disconnect or transport fault while waiting is reported as
    /// `EndOfStream`; the stream is over either way.
    pub async fn recv(&mut self) -> Result<Message> {
        match protocol::read_message(&mut self.stream).await? {
            Some(message) => Ok(message),
            None => {
                debug!("peer {} gone, treating as end of stream", self.peer);
                Ok(Message::EndOfStream)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected_pair() -> (DataChannel, DataChannel) {
        let listener = ChannelListener::bind().await.unwrap();
        let (accepted, connected) =
            tokio::join!(listener.accept(), DataChannel::connect(listener.address()));
        (accepted.unwrap(), connected.unwrap())
    }

    #[tokio::test]
    async fn test_send_recv_roundtrip() {
        let (mut server, mut client) = connected_pair().await;

        let sender = tokio::spawn(async move {
            client.send(&Message::Data(vec![4.0, 2.0])).await.unwrap();
            client.send(&Message::EndOfWindow).await.unwrap();
            client.send(&Message::EndOfStream).await.unwrap();
        });

        assert_eq!(server.recv().await.unwrap(), Message::Data(vec![4.0, 2.0]));
        assert_eq!(server.recv().await.unwrap(), Message::EndOfWindow);
        assert_eq!(server.recv().await.unwrap(), Message::EndOfStream);
        sender.await.unwrap();
    }

    #[tokio::test]
    async fn test_per_sender_order_is_preserved() {
        let (mut server, mut client) = connected_pair().await;
        let count = 50u64;

        let sender = tokio::spawn(async move {
            for i in 0..count {
                client.send(&Message::Data(vec![i as f64])).await.unwrap();
            }
            client.send(&Message::EndOfStream).await.unwrap();
        });

        for i in 0..count {
            assert_eq!(server.recv().await.unwrap(), Message::Data(vec![i as f64]));
        }
        assert_eq!(server.recv().await.unwrap(), Message::EndOfStream);
        sender.await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_reads_as_end_of_stream() {
        let (mut server, client) = connected_pair().await;
        drop(client);

        assert_eq!(server.recv().await.unwrap(), Message::EndOfStream);
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_address() {
        let result = DataChannel::connect("not-an-address").await;
        assert!(matches!(result, Err(CadenceError::InvalidAddress { .. })));
    }

    #[tokio::test]
    async fn test_connect_to_dead_port_fails() {
        // Port 1 is never listening on a developer machine.
        let result = DataChannel::connect("127.0.0.1:1").await;
        assert!(matches!(result, Err(CadenceError::ConnectFailed { .. })));
    }
}
