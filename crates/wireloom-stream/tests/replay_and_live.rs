//! Scenario 4 ("stream replay+live"): storage is seeded with seqs 1..100, a
//! client opens `mode=seq;seq=50`, a live producer posts seqs 101..103 while
//! the client is still replaying, and the client must observe seqs 50..103
//! in order, exactly once each, with exactly one `Online` control reported
//! after it reaches seq 100.
//!
//! `StreamClient`/`StreamServer` compose their `live`/`request` sub-channels
//! generically through `Context::create_channel`, so the test registers a
//! small in-process loopback transport (`loop://`) under that same registry
//! instead of opening real sockets — the same role `DirectChannel` plays in
//! `wireloom_core::processor`'s own tests. The server and client are driven
//! through a real `EventLoop`, not by calling `process()` directly, so the
//! test also exercises `need_process`/dcaps wiring the way a worker thread
//! would.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use wireloom_core::channel::{check_post_allowed, Channel, ChannelBase, Dcaps, State, StaticCaps};
use wireloom_core::config::Config;
use wireloom_core::context::Context;
use wireloom_core::evloop::EventLoop;
use wireloom_core::message::{Message, MsgMask, MsgType};

type Queue = Arc<Mutex<VecDeque<Message>>>;

fn registry() -> &'static Mutex<HashMap<String, (Queue, Queue)>> {
    static REG: OnceLock<Mutex<HashMap<String, (Queue, Queue)>>> = OnceLock::new();
    REG.get_or_init(|| Mutex::new(HashMap::new()))
}

struct LoopChannel {
    base: ChannelBase,
    inbound: Queue,
    outbound: Queue,
}

impl std::fmt::Debug for LoopChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopChannel").field("base", &self.base).finish()
    }
}

impl LoopChannel {
    fn new(name: &str, cfg: &Config) -> LoopChannel {
        let id = cfg.get("tll.host").unwrap_or("default").to_string();
        let side_a = cfg.get("side") != Some("b");
        let mut reg = registry().lock().unwrap();
        let (q_ab, q_ba) = reg
            .entry(id)
            .or_insert_with(|| (Arc::new(Mutex::new(VecDeque::new())), Arc::new(Mutex::new(VecDeque::new()))))
            .clone();
        let (inbound, outbound) = if side_a { (q_ba, q_ab) } else { (q_ab, q_ba) };
        LoopChannel {
            base: ChannelBase::new(name, "loop", StaticCaps::INPUT | StaticCaps::OUTPUT),
            inbound,
            outbound,
        }
    }
}

impl Channel for LoopChannel {
    fn base(&self) -> &ChannelBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut ChannelBase {
        &mut self.base
    }
    fn open(&mut self) -> wireloom_core::Result<()> {
        self.base.set_state(State::Opening)?;
        self.base.set_state(State::Active)?;
        self.base.add_dcaps(Dcaps::PROCESS | Dcaps::PENDING);
        Ok(())
    }
    fn process(&mut self) -> wireloom_core::Result<bool> {
        match self.inbound.lock().unwrap().pop_front() {
            Some(msg) => {
                self.base.dispatch(&msg);
                Ok(true)
            }
            None => Ok(false),
        }
    }
    fn post(&mut self, msg: &Message) -> wireloom_core::Result<()> {
        check_post_allowed(&self.base)?;
        self.outbound.lock().unwrap().push_back(msg.clone());
        Ok(())
    }
    fn close(&mut self, _force: bool) -> wireloom_core::Result<()> {
        if self.base.state() == State::Active {
            self.base.set_state(State::Closing)?;
        }
        self.base.set_state(State::Closed)
    }
}

fn register_loop(ctx: &Context) {
    ctx.register_factory(
        "loop",
        Arc::new(|name: &str, cfg: &Config| {
            Ok(Box::new(LoopChannel::new(name, cfg)) as Box<dyn Channel + Send>)
        }),
    );
}

#[test]
fn replay_then_live_join_with_no_gap_and_no_duplicate() {
    let ctx = Context::new();
    wireloom_stream::register(&ctx);
    register_loop(&ctx);

    let mut server_cfg = Config::new();
    server_cfg.set("size", "65536");
    for (k, v) in [("request.tll.proto", "loop"), ("request.tll.host", "replay-req"), ("request.side", "b")] {
        server_cfg.set(k, v);
    }

    let server = wireloom_stream::StreamServer::new(&ctx, "server", "stream+server", &server_cfg).unwrap();

    let mut client_cfg = Config::new();
    client_cfg.set("mode", "seq");
    client_cfg.set("seq", "50");
    client_cfg.set("peer", "test-client");
    for (k, v) in [("live.tll.proto", "loop"), ("live.tll.host", "replay-live"), ("live.side", "b")] {
        client_cfg.set(k, v);
    }
    for (k, v) in [("request.tll.proto", "loop"), ("request.tll.host", "replay-req"), ("request.side", "a")] {
        client_cfg.set(k, v);
    }

    let client = wireloom_stream::StreamClient::new(&ctx, "client", "stream+client", &client_cfg).unwrap();

    let mut evloop = EventLoop::new().unwrap();
    evloop.add(Box::new(server));
    evloop.add(Box::new(client));

    let observed: Arc<Mutex<Vec<Message>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();
    evloop.channel_mut("client").unwrap().base_mut().add_callback(
        1,
        MsgMask::ALL,
        Box::new(move |msg: &Message| {
            sink.lock().unwrap().push(msg.clone());
        }),
    );

    evloop.channel_mut("server").unwrap().open().unwrap();
    evloop.channel_mut("client").unwrap().open().unwrap();

    // Drive a few steps so the server reaches Active before storage is seeded.
    for _ in 0..10 {
        evloop.step(Duration::from_millis(0)).unwrap();
    }
    assert_eq!(evloop.channel_mut("server").unwrap().base().state(), State::Active);

    for seq in 1..=100i64 {
        let msg = Message::data(1, seq, format!("m{seq}").into_bytes());
        evloop.channel_mut("server").unwrap().post(&msg).unwrap();
    }

    // Producer posts the live tail while the client is still replaying.
    let mut producer_cfg = Config::new();
    producer_cfg.set("tll.host", "replay-live");
    producer_cfg.set("side", "a");
    let mut producer = LoopChannel::new("producer", &producer_cfg);
    producer.open().unwrap();
    for seq in 101..=103i64 {
        let msg = Message::data(1, seq, format!("m{seq}").into_bytes());
        producer.post(&msg).unwrap();
    }

    for _ in 0..2000 {
        evloop.step(Duration::from_millis(0)).unwrap();
        if observed
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.ty == MsgType::Control && m.msgid == wireloom_stream::control::ONLINE)
        {
            break;
        }
    }

    let observed = observed.lock().unwrap();
    let data_seqs: Vec<i64> = observed.iter().filter(|m| m.ty == MsgType::Data).map(|m| m.seq).collect();
    let online_count = observed.iter().filter(|m| m.ty == MsgType::Control).count();

    assert_eq!(online_count, 1, "expected exactly one Online control, observed {online_count}");
    let expected: Vec<i64> = (50..=103).collect();
    assert_eq!(data_seqs, expected, "replay+live data must be gapless, ordered, and duplicate-free");
}
