//! Agent against a live relay

use burrow_agent::{Agent, AgentConfig, AgentMode};
use burrow_pool::PortPool;
use burrow_server::{RelayConfig, RelayServer, SessionRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

async fn start_relay(range: (u16, u16)) -> (SocketAddr, Arc<SessionRegistry>) {
    let config = RelayConfig {
        listen_port: 0,
        port_range: range,
        ..Default::default()
    };
    let pool = Arc::new(PortPool::new(range.0, range.1).unwrap());
    let server = RelayServer::new(config, pool);
    let registry = server.registry();
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    (addr, registry)
}

async fn session_port(registry: &SessionRegistry) -> u16 {
    timeout(Duration::from_secs(5), async {
        loop {
            if let Some(session) = registry.active_sessions().first() {
                return session.port;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("agent session never came up")
}

fn agent_for(relay: SocketAddr, mode: AgentMode) -> Agent {
    Agent::new(AgentConfig {
        relay_host: relay.ip().to_string(),
        relay_port: relay.port(),
        buffer_size: 16,
        mode,
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn test_echo_agent_through_relay() {
    let (relay, registry) = start_relay((22000, 22009)).await;
    let agent = agent_for(relay, AgentMode::Echo);
    let agent_task = tokio::spawn(async move { agent.run().await });

    let port = session_port(&registry).await;
    let mut visitor = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    visitor.write_all(b"PING").await.unwrap();

    let mut reply = [0u8; 4];
    timeout(Duration::from_secs(5), visitor.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&reply, b"PING");

    agent_task.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_forward_agent_exposes_local_service() {
    // Local service that answers PING with PONG
    let service = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let service_addr = service.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = service.accept().await.unwrap();
        let mut buf = [0u8; 4];
        while stream.read_exact(&mut buf).await.is_ok() {
            if &buf == b"PING" {
                stream.write_all(b"PONG").await.unwrap();
            }
        }
    });

    let (relay, registry) = start_relay((22010, 22019)).await;
    let agent = agent_for(
        relay,
        AgentMode::Forward {
            target: service_addr.to_string(),
        },
    );
    let agent_task = tokio::spawn(async move { agent.run().await });

    let port = session_port(&registry).await;
    let mut visitor = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    for _ in 0..3 {
        visitor.write_all(b"PING").await.unwrap();
        let mut reply = [0u8; 4];
        timeout(Duration::from_secs(5), visitor.read_exact(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&reply, b"PONG");
    }

    agent_task.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_agent_returns_when_relay_closes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay = listener.local_addr().unwrap();

    let agent = agent_for(relay, AgentMode::Echo);
    let agent_task = tokio::spawn(async move { agent.run().await });

    let (mut conn, _) = listener.accept().await.unwrap();
    conn.write_all(b"hi").await.unwrap();
    let mut echoed = [0u8; 2];
    conn.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"hi");
    drop(conn);

    let stats = timeout(Duration::from_secs(5), agent_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(stats.requests, 1);
    assert_eq!(stats.bytes_in, 2);
    assert_eq!(stats.bytes_out, 2);
}
