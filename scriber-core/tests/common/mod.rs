#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use scriber_core::{
    AudioHost, CaptureEngine, ChunkSink, Clock, DeviceId, EngineConfig, HostError, InputStream,
    RawDevice,
};

pub const CHUNK: usize = 512;
pub const CHUNK_DURATION: Duration = Duration::from_millis(32);

/// Clock that only moves when told to.
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

struct FakeStreamState {
    device: Option<DeviceId>,
    active: AtomicBool,
    sink: Mutex<Option<ChunkSink>>,
}

struct FakeStream {
    state: Arc<FakeStreamState>,
}

impl InputStream for FakeStream {
    fn is_active(&self) -> bool {
        self.state.active.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        self.state.active.store(false, Ordering::SeqCst);
        self.state.sink.lock().take();
    }
}

/// In-memory audio runtime. Audio is pushed by the test through `feed`.
#[derive(Default)]
pub struct FakeHost {
    devices: Mutex<Vec<RawDevice>>,
    refuse: Mutex<Vec<Option<DeviceId>>>,
    streams: Mutex<Vec<Arc<FakeStreamState>>>,
    opened: Mutex<Vec<Option<DeviceId>>>,
}

impl FakeHost {
    pub fn new(devices: &[(DeviceId, &str)]) -> Arc<Self> {
        let host = Self::default();
        host.set_devices(devices);
        Arc::new(host)
    }

    pub fn set_devices(&self, devices: &[(DeviceId, &str)]) {
        *self.devices.lock() = devices
            .iter()
            .map(|&(id, name)| RawDevice {
                id,
                name: name.to_string(),
                input_channels: 1,
            })
            .collect();
    }

    pub fn refuse(&self, device: Option<DeviceId>) {
        self.refuse.lock().push(device);
    }

    /// Every open attempt that succeeded, in order.
    pub fn opened(&self) -> Vec<Option<DeviceId>> {
        self.opened.lock().clone()
    }

    fn live(&self) -> Option<Arc<FakeStreamState>> {
        self.streams
            .lock()
            .iter()
            .rev()
            .find(|s| s.sink.lock().is_some())
            .cloned()
    }

    /// Number of streams that have not been stopped.
    pub fn open_streams(&self) -> usize {
        self.streams
            .lock()
            .iter()
            .filter(|s| s.sink.lock().is_some())
            .count()
    }

    /// Deliver one buffer to the newest open stream. Returns false if none.
    pub fn feed(&self, samples: &[f32]) -> bool {
        let Some(stream) = self.live() else {
            return false;
        };
        let mut sink = stream.sink.lock();
        match sink.as_mut() {
            Some(sink) => {
                sink(samples);
                true
            }
            None => false,
        }
    }

    /// Simulate the OS dropping the device under a running stream.
    pub fn kill_streams(&self) {
        for stream in self.streams.lock().iter() {
            stream.active.store(false, Ordering::SeqCst);
        }
    }
}

impl AudioHost for FakeHost {
    fn list_input_devices(&self) -> Result<Vec<RawDevice>, HostError> {
        Ok(self.devices.lock().clone())
    }

    fn open_input(
        &self,
        device: Option<DeviceId>,
        sink: ChunkSink,
    ) -> Result<Box<dyn InputStream>, HostError> {
        if self.refuse.lock().contains(&device) {
            return Err(HostError::DeviceBusy(format!("{device:?}")));
        }
        if let Some(id) = device {
            if !self.devices.lock().iter().any(|d| d.id == id) {
                return Err(HostError::DeviceNotFound(id.to_string()));
            }
        }
        let state = Arc::new(FakeStreamState {
            device,
            active: AtomicBool::new(true),
            sink: Mutex::new(Some(sink)),
        });
        self.streams.lock().push(Arc::clone(&state));
        self.opened.lock().push(device);
        Ok(Box::new(FakeStream { state }))
    }
}

pub struct Rig {
    pub host: Arc<FakeHost>,
    pub clock: Arc<ManualClock>,
    pub engine: CaptureEngine,
    pub dir: tempfile::TempDir,
}

impl Rig {
    pub fn new(devices: &[(DeviceId, &str)]) -> Self {
        Self::with_config(devices, |_| {})
    }

    pub fn with_config(
        devices: &[(DeviceId, &str)],
        tweak: impl FnOnce(&mut EngineConfig),
    ) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = EngineConfig {
            work_dir: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        tweak(&mut config);

        let host = FakeHost::new(devices);
        let clock = Arc::new(ManualClock::new());
        let engine = CaptureEngine::with_clock(host.clone(), clock.clone(), config);
        Self {
            host,
            clock,
            engine,
            dir,
        }
    }

    /// Feed `chunks` chunks of constant `level`, advancing the clock in step.
    pub fn feed_chunks(&self, chunks: usize, level: f32) {
        let buf = [level; CHUNK];
        for _ in 0..chunks {
            assert!(self.host.feed(&buf), "no open stream to feed");
            self.clock.advance(CHUNK_DURATION);
        }
    }

    /// Feed roughly `duration` of audio at `level`.
    pub fn feed_for(&self, duration: Duration, level: f32) -> usize {
        let chunks = (duration.as_millis() / CHUNK_DURATION.as_millis()) as usize;
        self.feed_chunks(chunks, level);
        chunks
    }
}
