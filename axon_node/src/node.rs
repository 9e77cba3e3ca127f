//! Node: the per-process aggregate of publishers, subscribers, timers and
//! the executor that drives them.

use crate::error::NodeResult;
use crate::message::Serializer;
use crate::publisher::Publisher;
use crate::signals;
use crate::subscriber::{Dispatch, Subscriber};
use crate::thread_pool::ThreadPool;
use crate::timer::Timer;
use axon::config::NodeConfig;
use axon_shared_memory::{EventBus, Registry};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A pub/sub participant.
///
/// Construction performs the fatal-on-failure initialization: tracing setup
/// at the configured level, registry and event bus rendezvous, node slot
/// registration, signal binding, worker pool and heartbeat startup. `spin`
/// then runs the dispatch loop on its own thread until `stop` or a
/// termination signal.
///
/// The node owns its publishers, subscribers and timers; they hold shared
/// handles to the registry and the bus but never own either segment.
pub struct Node {
    config: NodeConfig,
    node_id: u32,
    topic_prefix: String,
    registry: Arc<Mutex<Registry>>,
    bus: Arc<EventBus>,
    pool: Arc<ThreadPool>,
    dispatchers: Arc<Mutex<Vec<Arc<dyn Dispatch>>>>,
    timers: Arc<Mutex<Vec<Arc<Timer>>>>,
    publishers: Mutex<Vec<Arc<dyn Any + Send + Sync>>>,
    spinning: Arc<AtomicBool>,
    heartbeat_running: Arc<AtomicBool>,
    spin_thread: Mutex<Option<JoinHandle<()>>>,
    heartbeat_thread: Mutex<Option<JoinHandle<()>>>,
    owns_signal_handlers: bool,
    unregistered: AtomicBool,
}

impl Node {
    /// Create a node with default configuration and the given name.
    pub fn new(node_name: impl Into<String>) -> NodeResult<Self> {
        Self::with_config(NodeConfig::named(node_name))
    }

    /// Create a node from a full configuration.
    pub fn with_config(config: NodeConfig) -> NodeResult<Self> {
        config.validate()?;
        axon::init_tracing(config.log_level);

        let registry = Arc::new(Mutex::new(Registry::open_or_create(&config.registry_name)?));
        let bus = Arc::new(EventBus::open_or_create(&config.event_bus_name)?);

        let node_id = registry.lock().register_node(&config.node_name)?;
        let owns_signal_handlers = signals::install()?;
        let pool = Arc::new(ThreadPool::new(config.workers)?);

        let namespace_part = if config.namespace.is_empty() {
            String::new()
        } else {
            format!("{}_", config.namespace)
        };
        let topic_prefix = format!("/{}_{}", config.domain_id, namespace_part);

        let heartbeat_running = Arc::new(AtomicBool::new(true));
        let heartbeat_thread = {
            let registry = Arc::clone(&registry);
            let running = Arc::clone(&heartbeat_running);
            let interval = Duration::from_secs(config.heartbeat_interval_secs);
            std::thread::Builder::new()
                .name(format!("{}-heartbeat", config.node_name))
                .spawn(move || heartbeat_loop(&registry, node_id, interval, &running))?
        };

        info!(
            node = %config.node_name,
            node_id, prefix = %topic_prefix, "node registered"
        );

        Ok(Self {
            config,
            node_id,
            topic_prefix,
            registry,
            bus,
            pool,
            dispatchers: Arc::new(Mutex::new(Vec::new())),
            timers: Arc::new(Mutex::new(Vec::new())),
            publishers: Mutex::new(Vec::new()),
            spinning: Arc::new(AtomicBool::new(false)),
            heartbeat_running,
            spin_thread: Mutex::new(None),
            heartbeat_thread: Mutex::new(Some(heartbeat_thread)),
            owns_signal_handlers,
            unregistered: AtomicBool::new(false),
        })
    }

    /// Create a publisher for `(topic, event)` with the given codec.
    ///
    /// The declaration and event-id assignment are recorded in the
    /// registry immediately; the topic channel appears on first publish.
    pub fn create_publisher<M, S>(
        &self,
        topic: &str,
        event: &str,
        codec: S,
    ) -> NodeResult<Arc<Publisher<M, S>>>
    where
        M: 'static,
        S: Serializer<M>,
    {
        let full_topic = format!("{}{}", self.topic_prefix, topic);
        let event_id = {
            let mut registry = self.registry.lock();
            registry.add_pub_topic(self.node_id, &full_topic, event)?;
            registry.register_topic_event(&full_topic, event)?
        };

        let publisher = Arc::new(Publisher::new(
            full_topic,
            event.to_string(),
            codec,
            Arc::clone(&self.registry),
            Arc::clone(&self.bus),
        ));
        publisher.prime_event_id(event_id);

        self.publishers
            .lock()
            .push(Arc::clone(&publisher) as Arc<dyn Any + Send + Sync>);
        Ok(publisher)
    }

    /// Create a subscriber for `(topic, event)` invoking `callback` for
    /// each dispatched message.
    pub fn create_subscriber<M, S>(
        &self,
        topic: &str,
        event: &str,
        codec: S,
        callback: impl Fn(&M) + Send + Sync + 'static,
    ) -> NodeResult<Arc<Subscriber<M, S>>>
    where
        M: 'static,
        S: Serializer<M>,
    {
        let full_topic = format!("{}{}", self.topic_prefix, topic);
        let subscriber = Arc::new(Subscriber::new(
            full_topic.clone(),
            event.to_string(),
            codec,
            callback,
            &self.registry,
        )?);
        self.registry
            .lock()
            .add_sub_topic(self.node_id, &full_topic, event)?;

        self.dispatchers
            .lock()
            .push(Arc::clone(&subscriber) as Arc<dyn Dispatch>);
        Ok(subscriber)
    }

    /// Create a periodic timer dispatched from the spin loop.
    pub fn create_timer(
        &self,
        period: Duration,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Arc<Timer> {
        let timer = Arc::new(Timer::new(period, callback));
        self.timers.lock().push(Arc::clone(&timer));
        timer
    }

    /// Start the spin thread. Idempotent while spinning.
    pub fn spin(&self) -> NodeResult<()> {
        let mut slot = self.spin_thread.lock();
        if self.spinning.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // A previous spin that exited on a signal leaves its finished
        // thread behind; reap it before starting the next one.
        if let Some(previous) = slot.take() {
            let _ = previous.join();
        }

        let ctx = SpinContext {
            node_name: self.config.node_name.clone(),
            bus: Arc::clone(&self.bus),
            registry: Arc::clone(&self.registry),
            dispatchers: Arc::clone(&self.dispatchers),
            timers: Arc::clone(&self.timers),
            pool: Arc::clone(&self.pool),
            spinning: Arc::clone(&self.spinning),
            idle_cap_ms: self.config.idle_cap_ms,
        };
        *slot = Some(
            std::thread::Builder::new()
                .name(format!("{}-spin", self.config.node_name))
                .spawn(move || spin_loop(ctx))?,
        );
        Ok(())
    }

    /// Whether the spin loop is currently running.
    pub fn is_spinning(&self) -> bool {
        self.spinning.load(Ordering::Acquire)
    }

    /// Orderly shutdown: stop the spin flag, wake the bus so the spin
    /// thread cannot sleep past it, join it, drain and stop the worker
    /// pool, then release this node's registry slot. Terminal and
    /// idempotent.
    pub fn stop(&self) {
        self.spinning.store(false, Ordering::Release);
        if let Err(e) = self.bus.notify_all() {
            warn!(error = %e, "shutdown bus broadcast failed");
        }
        if let Some(handle) = self.spin_thread.lock().take() {
            let _ = handle.join();
        }

        self.heartbeat_running.store(false, Ordering::Release);
        if let Some(handle) = self.heartbeat_thread.lock().take() {
            let _ = handle.join();
        }

        self.pool.stop();

        if !self.unregistered.swap(true, Ordering::AcqRel) {
            if let Err(e) = self.registry.lock().unregister_node(self.node_id) {
                warn!(error = %e, "node unregistration failed");
            }
            info!(node = %self.config.node_name, node_id = self.node_id, "node stopped");
        }
    }

    /// Registry slot id of this node.
    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// Node name.
    pub fn name(&self) -> &str {
        &self.config.node_name
    }

    /// Prefix folded into every topic this node declares.
    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.stop();
        signals::uninstall(self.owns_signal_handlers);
    }
}

struct SpinContext {
    node_name: String,
    bus: Arc<EventBus>,
    registry: Arc<Mutex<Registry>>,
    dispatchers: Arc<Mutex<Vec<Arc<dyn Dispatch>>>>,
    timers: Arc<Mutex<Vec<Arc<Timer>>>>,
    pool: Arc<ThreadPool>,
    spinning: Arc<AtomicBool>,
    idle_cap_ms: u64,
}

fn spin_loop(ctx: SpinContext) {
    debug!(node = %ctx.node_name, "spin loop started");
    loop {
        if !ctx.spinning.load(Ordering::Acquire) || signals::shutdown_requested() {
            break;
        }

        let wait_ms = next_wait_ms(&ctx);
        let snapshot = match ctx.bus.wait(wait_ms) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // Transient lock failures must not turn into a hot loop.
                warn!(node = %ctx.node_name, error = %e, "event bus wait failed");
                std::thread::sleep(Duration::from_millis(wait_ms));
                continue;
            }
        };

        if !ctx.spinning.load(Ordering::Acquire) || signals::shutdown_requested() {
            break;
        }

        let mut processed: Vec<usize> = Vec::new();
        {
            let dispatchers = ctx.dispatchers.lock();

            // Late event-id assignment for subscriptions that raced an
            // unreachable or full registry.
            for dispatcher in dispatchers.iter().filter(|d| d.event_id().is_none()) {
                dispatcher.try_bind(&mut ctx.registry.lock());
            }

            for dispatcher in dispatchers.iter() {
                let Some(event_id) = dispatcher.event_id() else {
                    continue;
                };
                if !snapshot.get(event_id as usize) {
                    continue;
                }
                match dispatcher.make_task() {
                    Ok(task) => match ctx.pool.enqueue(task) {
                        Ok(()) => processed.push(event_id as usize),
                        // A skipped bit stays set and retries next round.
                        Err(e) => {
                            warn!(key = %dispatcher.key(), error = %e, "dispatch skipped")
                        }
                    },
                    Err(e) => {
                        warn!(key = %dispatcher.key(), error = %e, "subscriber fetch failed")
                    }
                }
            }
        }

        // Clear exactly the bits dispatched here. A global read-and-clear
        // would race executors in other processes sharing the bus.
        for event_id in processed {
            if let Err(e) = ctx.bus.clear(event_id) {
                warn!(node = %ctx.node_name, event_id, error = %e, "event bit clear failed");
            }
        }

        let due: Vec<Arc<Timer>> = {
            let timers = ctx.timers.lock();
            timers.iter().filter(|t| t.is_ready()).cloned().collect()
        };
        for timer in due {
            let task_timer = Arc::clone(&timer);
            if let Err(e) = ctx.pool.enqueue(Box::new(move || task_timer.execute())) {
                warn!(node = %ctx.node_name, error = %e, "timer dispatch skipped");
            }
        }
    }

    ctx.spinning.store(false, Ordering::Release);
    debug!(node = %ctx.node_name, "spin loop exited");
}

fn next_wait_ms(ctx: &SpinContext) -> u64 {
    let timers = ctx.timers.lock();
    timers
        .iter()
        .filter(|t| t.is_active())
        .map(|t| (t.period().as_millis() as u64).max(1))
        .min()
        .map_or(ctx.idle_cap_ms, |shortest| shortest.min(ctx.idle_cap_ms))
}

fn heartbeat_loop(
    registry: &Arc<Mutex<Registry>>,
    node_id: u32,
    interval: Duration,
    running: &AtomicBool,
) {
    let step = Duration::from_millis(100);
    let mut since_beat = Duration::ZERO;
    while running.load(Ordering::Acquire) {
        std::thread::sleep(step.min(interval));
        since_beat += step;
        if since_beat >= interval {
            since_beat = Duration::ZERO;
            if let Err(e) = registry.lock().heartbeat(node_id) {
                warn!(node_id, error = %e, "heartbeat update failed");
            }
        }
    }
}
