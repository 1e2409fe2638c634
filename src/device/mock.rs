use crate::Device;
use etherparse::Ipv4HeaderSlice;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Packets waiting to be read by one side.
#[derive(Default)]
struct Queue {
    packets: Mutex<VecDeque<Vec<u8>>>,
    ready: Condvar,
}

impl Queue {
    fn push(&self, packet: Vec<u8>) {
        self.packets.lock().unwrap().push_back(packet);
        self.ready.notify_all();
    }
}

#[derive(Default)]
struct Shared {
    rx: Arc<Queue>,
    // The peer's rx queue when wired as a pair.
    tx: Option<Arc<Queue>>,
    tx_log: Mutex<Vec<(String, Vec<u8>)>>,
    nonblocking: AtomicBool,
    woken: AtomicBool,
    released: AtomicBool,
    reads: AtomicUsize,
    wakes: AtomicUsize,
    read_faults: Mutex<VecDeque<io::ErrorKind>>,
    drop_probability: Mutex<f32>,
}

/// In-memory TUN handle. Dropping it counts as releasing the device.
pub struct MockDevice {
    name: String,
    shared: Arc<Shared>,
}

/// Test-side view of a `MockDevice` that outlives the handle.
#[derive(Clone)]
pub struct MockLink {
    shared: Arc<Shared>,
}

impl MockDevice {
    pub fn new(name: &str) -> (Self, MockLink) {
        Self::with_shared(name, Shared::default())
    }

    /// Two devices where packets sent on one are read on the other.
    pub fn pair(a: &str, b: &str) -> ((Self, MockLink), (Self, MockLink)) {
        let a_rx = Arc::new(Queue::default());
        let b_rx = Arc::new(Queue::default());
        let a_side = Shared {
            rx: a_rx.clone(),
            tx: Some(b_rx.clone()),
            ..Shared::default()
        };
        let b_side = Shared {
            rx: b_rx,
            tx: Some(a_rx),
            ..Shared::default()
        };
        (Self::with_shared(a, a_side), Self::with_shared(b, b_side))
    }

    fn with_shared(name: &str, shared: Shared) -> (Self, MockLink) {
        let shared = Arc::new(shared);
        let link = MockLink {
            shared: shared.clone(),
        };
        (
            Self {
                name: name.to_string(),
                shared,
            },
            link,
        )
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.shared.released.store(true, Ordering::SeqCst);
    }
}

impl MockLink {
    pub fn inject_packet(&self, desc: &str, packet: Vec<u8>) {
        println!("🧪 INJECT: {} ({} bytes)", desc, packet.len());
        self.shared.rx.push(packet);
    }

    pub fn get_sent_packets(&self) -> Vec<(String, Vec<u8>)> {
        self.shared.tx_log.lock().unwrap().clone()
    }

    pub fn last_sent_packet(&self) -> Option<Vec<u8>> {
        self.shared
            .tx_log
            .lock()
            .unwrap()
            .last()
            .map(|(_, p)| p.clone())
    }

    /// Queue an error for the next read that would otherwise succeed or block.
    pub fn fail_next_read(&self, kind: io::ErrorKind) {
        self.shared.read_faults.lock().unwrap().push_back(kind);
    }

    /// Set packet loss probability (0.0 = no loss, 1.0 = drop all)
    pub fn set_drop_probability(&self, probability: f32) {
        let prob = probability.clamp(0.0, 1.0);
        *self.shared.drop_probability.lock().unwrap() = prob;
    }

    /// Number of `recv` calls the device has served.
    pub fn read_calls(&self) -> usize {
        self.shared.reads.load(Ordering::SeqCst)
    }

    pub fn wake_calls(&self) -> usize {
        self.shared.wakes.load(Ordering::SeqCst)
    }

    pub fn is_nonblocking(&self) -> bool {
        self.shared.nonblocking.load(Ordering::SeqCst)
    }

    /// `true` once the owning `MockDevice` has been dropped.
    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::SeqCst)
    }
}

impl Device for MockDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let shared = &self.shared;
        shared.reads.fetch_add(1, Ordering::SeqCst);

        if let Some(kind) = shared.read_faults.lock().unwrap().pop_front() {
            return Err(io::Error::from(kind));
        }

        let mut queue = shared.rx.packets.lock().unwrap();
        loop {
            if let Some(packet) = queue.pop_front() {
                let len = packet.len().min(buf.len());
                buf[..len].copy_from_slice(&packet[..len]);
                return Ok(len);
            }
            if shared.woken.load(Ordering::SeqCst) {
                // What the kernel delivers after the wake-up datagram.
                let len = buf.len().min(1);
                buf[..len].fill(1);
                return Ok(len);
            }
            if shared.nonblocking.load(Ordering::SeqCst) {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            queue = shared.rx.ready.wait(queue).unwrap();
        }
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        // Check if we should drop this packet
        let drop_probability = *self.shared.drop_probability.lock().unwrap();
        if drop_probability > 0.0 && rand::random::<f32>() < drop_probability {
            println!("🔥 DROPPING outgoing packet (simulation)");
            return Ok(buf.len());
        }

        let packet = buf.to_vec();
        let len = packet.len();
        let desc = match Ipv4HeaderSlice::from_slice(buf) {
            Ok(ip) => format!(
                "{} → {} proto={}",
                ip.source_addr(),
                ip.destination_addr(),
                ip.protocol().0
            ),
            Err(_) => "Unknown".to_string(),
        };
        println!("📤 SEND: {} ({} bytes)", desc, len);

        if let Some(peer) = &self.shared.tx {
            peer.push(packet.clone());
        }
        self.shared.tx_log.lock().unwrap().push((desc, packet));
        Ok(len)
    }

    fn set_nonblocking(&self) -> io::Result<()> {
        self.shared.nonblocking.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn wake_reader(&self) -> io::Result<()> {
        self.shared.wakes.fetch_add(1, Ordering::SeqCst);
        // Flip the flag under the queue lock so a reader between its checks
        // and `wait` cannot miss the notification.
        let _queue = self.shared.rx.packets.lock().unwrap();
        self.shared.woken.store(true, Ordering::SeqCst);
        self.shared.rx.ready.notify_all();
        Ok(())
    }
}
