//! End-to-end loopback round trip for the plain UDP channel: two channels
//! bound on `127.0.0.1`, each pointed at the other via `udp.peer`, posting
//! one datagram and draining it through `process()`.

use std::sync::{Arc, Mutex};
use wireloom_core::channel::Channel;
use wireloom_core::config::Config;
use wireloom_core::message::{Message, MsgType, Peer};
use wireloom_transport_udp::UdpChannel;

fn recording_channel(name: &str, bind: &str, peer: &str) -> (UdpChannel, Arc<Mutex<Vec<Message>>>) {
    let mut cfg = Config::new();
    cfg.set("udp.peer", peer);
    let mut channel = UdpChannel::new(name, "udp", bind, &cfg);
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    channel.base_mut().add_data_callback(
        1,
        Box::new(move |msg: &Message| sink.lock().unwrap().push(msg.clone())),
    );
    (channel, received)
}

#[test]
fn udp_channel_delivers_one_datagram() {
    let (mut server, _server_rx) = recording_channel("udp.server", "127.0.0.1:38471", "127.0.0.1:38472");
    let (mut client, client_rx) = recording_channel("udp.client", "127.0.0.1:38472", "127.0.0.1:38471");

    server.open().unwrap();
    client.open().unwrap();

    let msg = Message::data(7, 1, b"xxx".to_vec()).with_addr(Peer::Opaque(0));
    server.post(&msg).unwrap();

    // Retry a handful of times: the datagram is delivered asynchronously by
    // the OS, so `process()` may see `WouldBlock` on the first poll.
    let mut delivered = false;
    for _ in 0..200 {
        client.process().unwrap();
        if !client_rx.lock().unwrap().is_empty() {
            delivered = true;
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    assert!(delivered, "client never received the posted datagram");

    let got = client_rx.lock().unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].ty, MsgType::Data);
    assert_eq!(got[0].msgid, 7);
    assert_eq!(got[0].seq, 1);
    assert_eq!(got[0].data, b"xxx");
}
