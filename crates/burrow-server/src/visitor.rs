//! Visitor session handler: relays one visitor connection through the
//! session's data queue, one request/reply round trip at a time.

use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::chunk::read_chunk;
use crate::ipc::VisitorChannel;

pub struct VisitorSession {
    session_id: u64,
    visitor_id: u64,
    stream: TcpStream,
    peer_addr: SocketAddr,
    channel: VisitorChannel,
    buffer_size: usize,
}

impl VisitorSession {
    pub fn new(
        session_id: u64,
        visitor_id: u64,
        stream: TcpStream,
        peer_addr: SocketAddr,
        channel: VisitorChannel,
        buffer_size: usize,
    ) -> Self {
        Self {
            session_id,
            visitor_id,
            stream,
            peer_addr,
            channel,
            buffer_size,
        }
    }

    /// Relay until the visitor leaves, a socket fails, or StopClient arrives.
    /// Ends only this visitor's leg.
    pub async fn run(mut self) {
        let (session, visitor) = (self.session_id, self.visitor_id);
        let mut relayed = 0u64;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.channel.stopped() => {
                    debug!(session, visitor, "StopClient received");
                    break;
                }
                read = read_chunk(&mut self.stream, self.buffer_size) => match read {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => {
                        debug!(session, visitor, "Visitor closed connection");
                        break;
                    }
                    Err(e) => {
                        debug!(session, visitor, "Visitor read failed: {}", e);
                        break;
                    }
                },
            };

            let reply = match self.channel.round_trip(chunk).await {
                Ok(reply) => reply,
                Err(_) => {
                    debug!(session, visitor, "Relay stopped while waiting for agent");
                    break;
                }
            };

            // A visitor that stops reading must not hold off StopClient
            tokio::select! {
                biased;
                _ = self.channel.stopped() => {
                    debug!(session, visitor, "StopClient received while writing reply");
                    break;
                }
                written = self.stream.write_all(&reply) => {
                    if let Err(e) = written {
                        debug!(session, visitor, "Visitor write failed: {}", e);
                        break;
                    }
                }
            }
            relayed += reply.len() as u64;
        }

        let _ = self.stream.shutdown().await;
        debug!(
            session,
            visitor,
            bytes_to_visitor = relayed,
            "Visitor {} disconnected",
            self.peer_addr
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::relay_channel;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    async fn visitor_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (relay_side, peer) = accepted.unwrap();
        (client.unwrap(), relay_side, peer)
    }

    #[tokio::test]
    async fn test_reply_reaches_visitor() {
        let (mut supervisor, acceptor) = relay_channel();
        let (mut client, relay_side, peer) = visitor_pair().await;
        let handler = tokio::spawn(
            VisitorSession::new(1, 1, relay_side, peer, acceptor.visitor(), 32).run(),
        );

        client.write_all(b"PING").await.unwrap();
        let exchange = supervisor.next_exchange().await.unwrap();
        assert_eq!(&exchange.chunk[..], b"PING");
        exchange.reply.send(Bytes::from_static(b"PONG")).unwrap();

        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"PONG");

        drop(client);
        timeout(Duration::from_secs(1), handler).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_client_reaches_visitor_that_never_reads() {
        let (mut supervisor, acceptor) = relay_channel();
        let (mut client, relay_side, peer) = visitor_pair().await;
        let handler = tokio::spawn(
            VisitorSession::new(1, 2, relay_side, peer, acceptor.visitor(), 32).run(),
        );

        client.write_all(b"send me everything").await.unwrap();
        let exchange = supervisor.next_exchange().await.unwrap();
        // Far more than the loopback socket buffers hold
        exchange
            .reply
            .send(Bytes::from(vec![7u8; 32 * 1024 * 1024]))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!handler.is_finished(), "reply write should be stuck on backpressure");

        supervisor.stop_clients();
        timeout(Duration::from_secs(2), handler)
            .await
            .expect("visitor handler ignored StopClient while writing")
            .unwrap();
    }
}
