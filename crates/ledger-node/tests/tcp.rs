mod helpers;

use helpers::{mined_block, seeded_rng};
use ledger_core::GENESIS;
use ledger_node::transport::{bind, serve};
use ledger_node::{Message, Payload, PeerAddress, TcpTransport, Transport};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[tokio::test]
async fn block_crosses_a_real_socket() {
    let listener = bind(PeerAddress::localhost(0)).await.unwrap();
    let target = PeerAddress(listener.local_addr().unwrap());
    let (tx, mut rx) = mpsc::channel(8);
    let server = tokio::spawn(serve(listener, tx));

    let mut rng = seeded_rng(3);
    let (block, tree) = mined_block(&mut rng, GENESIS, 4);
    let message = Message::new(PeerAddress::localhost(8081), Payload::NewBlock { block, tree });
    TcpTransport.send(message.clone(), target);

    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("message within timeout")
        .expect("channel open");
    assert_eq!(received, message);
    server.abort();
}

#[tokio::test]
async fn send_to_closed_port_is_silent() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = PeerAddress(listener.local_addr().unwrap());
    drop(listener);
    TcpTransport.send(
        Message::new(PeerAddress::localhost(8081), Payload::HeartbeatPing),
        target,
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
}
