//! §8 "Memring round-trip": server mmaps a temp file, client opens the same
//! path, producer posts ten messages, client receives all ten in order, and
//! the file's magic equals `RING_MAGIC` once the server has opened it.

use std::sync::{Arc, Mutex};
use wireloom_core::channel::Channel;
use wireloom_core::config::Config;
use wireloom_core::message::Message;
use wireloom_core::ring::mem::RING_MAGIC;
use wireloom_transport_udp::{PubMemClient, PubMemServer};

#[test]
fn memring_round_trip_delivers_all_records_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("r");
    let path_str = path.to_str().unwrap();

    let mut cfg = Config::new();
    cfg.set("size", "64kb");
    let mut server = PubMemServer::new("mem.server", "pub+mem", path_str, &cfg);
    server.open().unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), RING_MAGIC);

    // The client's iterator starts at the ring head as of `open()`, so it
    // has to join before the producer posts to observe every record.
    let mut client = PubMemClient::new("mem.client", "pub+mem", path_str, &Config::new());
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    client.base_mut().add_data_callback(
        1,
        Box::new(move |msg: &Message| sink.lock().unwrap().push(msg.clone())),
    );
    client.open().unwrap();

    for n in 1..=10i64 {
        let msg = Message::data(7, n, format!("payload-{n}").into_bytes());
        server.post(&msg).unwrap();
    }

    for _ in 0..20 {
        client.process().unwrap();
    }

    let got = received.lock().unwrap();
    assert_eq!(got.len(), 10);
    for (i, msg) in got.iter().enumerate() {
        let n = i as i64 + 1;
        assert_eq!(msg.seq, n);
        assert_eq!(msg.data, format!("payload-{n}").into_bytes());
    }
}
