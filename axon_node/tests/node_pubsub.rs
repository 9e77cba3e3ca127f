//! End-to-end pub/sub behavior over a live node.
//!
//! Every test runs against its own registry and event bus segments so the
//! fixtures cannot bleed into one another (or into another test binary on
//! the same machine).

use axon::config::NodeConfig;
use axon_node::{JsonCodec, Node};
use axon_shared_memory::{EventBus, Registry};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn config(tag: &str) -> NodeConfig {
    let mut config = NodeConfig::named(format!("node_{tag}"));
    config.registry_name = format!("/axon_it_reg_{}_{}", tag, std::process::id());
    config.event_bus_name = format!("/axon_it_bus_{}_{}", tag, std::process::id());
    config.idle_cap_ms = 50;
    config.workers = 2;
    config
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn single_publisher_single_subscriber() {
    let cfg = config("s1");
    let node = Node::with_config(cfg.clone()).unwrap();

    let received = Arc::new(Mutex::new(Vec::<i32>::new()));
    let sink = Arc::clone(&received);
    let _subscriber = node
        .create_subscriber::<i32, _>("test", "x", JsonCodec::with_capacity(64), move |value| {
            sink.lock().push(*value);
        })
        .unwrap();
    let publisher = node
        .create_publisher::<i32, _>("test", "x", JsonCodec::with_capacity(64))
        .unwrap();

    node.spin().unwrap();
    publisher.publish(&7).unwrap();

    assert!(wait_until(|| received.lock().as_slice() == [7]));

    // The dispatched bit is cleared once the callback is enqueued.
    let bus = EventBus::open(&cfg.event_bus_name).unwrap();
    assert!(wait_until(|| !bus.read().unwrap().get(0)));

    // The registry holds the single assignment at position zero.
    let mut registry = Registry::open_or_create(&cfg.registry_name).unwrap();
    let full_topic = format!("{}test", node.topic_prefix());
    assert_eq!(registry.lookup_event_id(&full_topic, "x").unwrap(), Some(0));

    node.stop();
}

#[test]
fn two_events_dispatch_independently() {
    let cfg = config("s2");
    let node = Node::with_config(cfg.clone()).unwrap();

    let seen_e1 = Arc::new(Mutex::new(Vec::<i32>::new()));
    let seen_e2 = Arc::new(Mutex::new(Vec::<i32>::new()));
    {
        let sink = Arc::clone(&seen_e1);
        node.create_subscriber::<i32, _>("a", "e1", JsonCodec::with_capacity(64), move |v| {
            sink.lock().push(*v);
        })
        .unwrap();
    }
    {
        let sink = Arc::clone(&seen_e2);
        node.create_subscriber::<i32, _>("a", "e2", JsonCodec::with_capacity(64), move |v| {
            sink.lock().push(*v);
        })
        .unwrap();
    }
    let p1 = node
        .create_publisher::<i32, _>("a", "e1", JsonCodec::with_capacity(64))
        .unwrap();
    let p2 = node
        .create_publisher::<i32, _>("a", "e2", JsonCodec::with_capacity(64))
        .unwrap();

    // A bit nobody subscribes to must survive the dispatch cycle.
    let bus = EventBus::open(&cfg.event_bus_name).unwrap();
    bus.trigger(5).unwrap();

    p1.publish(&11).unwrap();
    p2.publish(&22).unwrap();
    node.spin().unwrap();

    assert!(wait_until(|| {
        seen_e1.lock().as_slice() == [11] && seen_e2.lock().as_slice() == [22]
    }));
    assert!(wait_until(|| {
        let snapshot = bus.read().unwrap();
        !snapshot.get(0) && !snapshot.get(1)
    }));
    assert!(bus.read().unwrap().get(5), "unrelated bit was clobbered");

    node.stop();
}

#[test]
fn latest_value_wins_without_intervening_wake() {
    let cfg = config("s3");
    let node = Node::with_config(cfg).unwrap();

    let received = Arc::new(Mutex::new(Vec::<i32>::new()));
    let sink = Arc::clone(&received);
    node.create_subscriber::<i32, _>("burst", "v", JsonCodec::with_capacity(64), move |v| {
        sink.lock().push(*v);
    })
    .unwrap();
    let publisher = node
        .create_publisher::<i32, _>("burst", "v", JsonCodec::with_capacity(64))
        .unwrap();

    // Three rapid publishes before anyone wakes: one bit, one dispatch,
    // newest payload.
    publisher.publish(&1).unwrap();
    publisher.publish(&2).unwrap();
    publisher.publish(&3).unwrap();

    node.spin().unwrap();
    assert!(wait_until(|| !received.lock().is_empty()));
    std::thread::sleep(Duration::from_millis(150));

    assert_eq!(*received.lock(), vec![3]);
    node.stop();
}

#[test]
fn subscriber_before_first_publish_attaches_late() {
    let cfg = config("intent");
    // Two nodes over the same segments, the way two processes would meet.
    let sub_node = Node::with_config({
        let mut c = cfg.clone();
        c.node_name = "listener".into();
        c
    })
    .unwrap();
    let pub_node = Node::with_config({
        let mut c = cfg;
        c.node_name = "talker".into();
        c
    })
    .unwrap();

    let received = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&received);
    // No channel exists yet: the subscription records intent.
    sub_node
        .create_subscriber::<String, _>("chat", "line", JsonCodec::with_capacity(256), move |s| {
            sink.lock().push(s.clone());
        })
        .unwrap();
    sub_node.spin().unwrap();

    let publisher = pub_node
        .create_publisher::<String, _>("chat", "line", JsonCodec::with_capacity(256))
        .unwrap();
    publisher.publish(&"hello".to_string()).unwrap();

    assert!(wait_until(|| received.lock().as_slice() == ["hello"]));

    sub_node.stop();
    pub_node.stop();
}

#[test]
fn timers_fire_on_the_pool() {
    let cfg = config("timer");
    let node = Node::with_config(cfg).unwrap();

    let ticks = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&ticks);
    let timer = node.create_timer(Duration::from_millis(20), move || {
        *counter.lock() += 1;
    });

    node.spin().unwrap();
    assert!(wait_until(|| *ticks.lock() >= 3));

    timer.stop();
    let frozen = *ticks.lock();
    std::thread::sleep(Duration::from_millis(100));
    assert!(*ticks.lock() <= frozen + 1, "stopped timer kept firing");

    node.stop();
}

#[test]
fn stop_is_prompt_and_releases_the_slot() {
    let cfg = config("s6");
    let node = Node::with_config(cfg.clone()).unwrap();

    let received = Arc::new(Mutex::new(Vec::<i32>::new()));
    let sink = Arc::clone(&received);
    node.create_subscriber::<i32, _>("load", "v", JsonCodec::with_capacity(64), move |v| {
        sink.lock().push(*v);
    })
    .unwrap();
    let publisher = node
        .create_publisher::<i32, _>("load", "v", JsonCodec::with_capacity(64))
        .unwrap();

    node.spin().unwrap();
    publisher.publish(&1).unwrap();
    assert!(wait_until(|| !received.lock().is_empty()));

    let mut registry = Registry::open_or_create(&cfg.registry_name).unwrap();
    registry.refresh().unwrap();
    let alive_before = registry.alive_node_count();
    assert!(alive_before >= 1);

    // The spin thread must observe the stop within the wait cap; the rest
    // of the sequence is joins and a registry write.
    let started = Instant::now();
    node.stop();
    assert!(
        started.elapsed() < Duration::from_millis(1000),
        "shutdown took {:?}",
        started.elapsed()
    );
    assert!(!node.is_spinning());

    registry.refresh().unwrap();
    assert_eq!(registry.alive_node_count(), alive_before - 1);
    let record = registry.node(node.node_id()).unwrap();
    assert!(!record.is_alive);
}
