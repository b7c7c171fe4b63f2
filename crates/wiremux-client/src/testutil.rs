//! Shared test harness: a client wired to an in-memory peer.

use bytes::Bytes;
use wiremux_proto::{Body, Command};
use wiremux_transport::{MemoryConnector, MemoryPeer};

use crate::client::Client;

/// Build a client over a loopback transport and connect it.
pub(crate) async fn connected() -> (Client, MemoryPeer) {
    let (connector, peer) = MemoryConnector::pair();
    let client = Client::builder()
        .url("mem://remote")
        .connector(connector)
        .build();
    client.connect().await.expect("connect");
    (client, peer)
}

/// Receive and decode the next command the client sent.
pub(crate) async fn recv_command(peer: &mut MemoryPeer) -> Command {
    let frame = peer.recv().await.expect("peer frame");
    Command::from_bytes(&frame).expect("decode")
}

/// Deliver a command to the client.
pub(crate) fn send_command(peer: &MemoryPeer, command: &Command) {
    let frame = command.to_bytes().expect("encode");
    peer.send(Bytes::from(frame)).expect("send");
}

/// Respond to `request` with `body`, echoing its channel and ref.
pub(crate) fn reply(peer: &MemoryPeer, request: &Command, body: Body) {
    let mut response = Command::with_body(body);
    response.channel = request.channel;
    response.reference = request.reference.clone();
    send_command(peer, &response);
}

/// Deliver an uncorrelated signal on `channel`.
pub(crate) fn send_on(peer: &MemoryPeer, channel: i32, body: Body) {
    let mut command = Command::with_body(body);
    command.channel = channel;
    send_command(peer, &command);
}
