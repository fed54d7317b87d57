//! Run controller and real-time loop
//!
//! `LightOrgan` owns at most one worker thread. The worker opens the serial
//! transport and the audio source itself (cpal streams cannot cross threads),
//! reports back once both are open, waits for the firmware to settle, and
//! then runs read -> analyse -> map -> encode -> write until the shared
//! running flag is cleared or a device faults.

use crate::audio::{AudioFrame, AudioSource, CaptureError, CpalSource, SourceError, SpectralAnalyzer, Spectrum};
use crate::config::{ConfigError, RunConfig};
use crate::patterns::{Coin, LampMapper, LampVector, ThreadCoin, NUM_LAMPS};
use crate::protocol::{ClientError, CommandEncoder, ConsoleTransport, LampTransport, SerialTransport};
use crate::state::{RunState, RunStatus};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Reference amplitude below which the input counts as silent
pub const IDLE_FLOOR: f32 = 50_000.0;

/// Run errors, surfaced to the caller as one notification each
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Port {port} does not exist! ({reason})")]
    TransportOpenFailed { port: String, reason: String },

    #[error("Audio device does not exist: {0}")]
    AudioDeviceNotFound(String),

    #[error("Failed to start audio stream: {0}")]
    AudioStreamFailed(String),

    #[error("Failed reading audio stream: {0}")]
    AudioReadFailed(String),

    #[error("Failed writing to serial port: {0}")]
    TransportWriteFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Worker thread error: {0}")]
    ThreadError(String),
}

impl From<ClientError> for RunError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::OpenFailed { port, reason } => RunError::TransportOpenFailed { port, reason },
            other => RunError::TransportWriteFailed(other.to_string()),
        }
    }
}

impl RunError {
    /// Map a failure to open the audio source
    fn from_audio_open(err: CaptureError) -> Self {
        match err {
            CaptureError::Source(SourceError::DeviceNotFound(name)) => RunError::AudioDeviceNotFound(name),
            other => RunError::AudioStreamFailed(other.to_string()),
        }
    }
}

/// Opens the devices a run needs
pub trait Backend: Send + Sync + 'static {
    fn open_transport(&self, config: &RunConfig) -> Result<Box<dyn LampTransport>, RunError>;

    fn open_audio(&self, config: &RunConfig) -> Result<Box<dyn AudioSource>, RunError>;
}

/// Real hardware: serialport + cpal. `dry_run` prints lamps instead.
#[derive(Debug, Clone, Default)]
pub struct SystemBackend {
    pub dry_run: bool,
}

impl Backend for SystemBackend {
    fn open_transport(&self, config: &RunConfig) -> Result<Box<dyn LampTransport>, RunError> {
        if self.dry_run {
            log::info!("Dry run: printing lamp states instead of writing to {}", config.port);
            return Ok(Box::new(ConsoleTransport::new(std::io::stdout(), config.inversion)));
        }
        Ok(Box::new(SerialTransport::open(&config.port)?))
    }

    fn open_audio(&self, config: &RunConfig) -> Result<Box<dyn AudioSource>, RunError> {
        let source = CpalSource::open(config).map_err(RunError::from_audio_open)?;
        Ok(Box::new(source))
    }
}

/// One run's pipeline over borrowed devices
pub struct RunLoop<'a> {
    config: &'a RunConfig,
    source: &'a mut dyn AudioSource,
    transport: &'a mut dyn LampTransport,
    state: &'a RunState,
    coin: &'a mut dyn Coin,
    analyzer: SpectralAnalyzer,
    mapper: LampMapper,
    encoder: CommandEncoder,
    delay: Duration,
}

impl<'a> RunLoop<'a> {
    pub fn new(
        config: &'a RunConfig,
        source: &'a mut dyn AudioSource,
        transport: &'a mut dyn LampTransport,
        state: &'a RunState,
        coin: &'a mut dyn Coin,
    ) -> Self {
        Self {
            config,
            source,
            transport,
            state,
            coin,
            analyzer: SpectralAnalyzer::new(),
            mapper: LampMapper::from_config(config),
            encoder: CommandEncoder::new(config.inversion),
            delay: config.delay(),
        }
    }

    /// Iterate until the running flag clears. The first fault ends the run.
    pub fn run(&mut self) -> Result<(), RunError> {
        while self.state.is_running() {
            self.step()?;
        }
        Ok(())
    }

    /// One control cycle
    pub fn step(&mut self) -> Result<(), RunError> {
        let frame = self.read_frame()?;
        let mut spectrum = self.spectrum(&frame)?;

        if self.mapper.reference_amplitude(&spectrum) < IDLE_FLOOR {
            match self.idle_sequence()? {
                Some(returned) => spectrum = returned,
                None => return Ok(()),
            }
        }

        let lamps = self.mapper.map(&spectrum, &mut *self.coin);
        log::trace!("Lamps {:08b}", lamps.bits());
        self.show(&lamps)?;

        if lamps.any() && !self.delay.is_zero() {
            self.state.sleep(self.delay);
            let release = self.encoder.release(&lamps);
            self.transport.write(&release)?;
        }

        Ok(())
    }

    /// Chase lamps 0..7 while the input stays quiet. Returns the spectrum
    /// that brought the signal back above the threshold, if any.
    fn idle_sequence(&mut self) -> Result<Option<Spectrum>, RunError> {
        log::debug!("No signal, starting idle sequence");

        for lamp in 0..NUM_LAMPS {
            if !self.state.is_running() {
                return Ok(None);
            }
            self.show(&LampVector::one_hot(lamp))?;

            if !self.state.sleep(self.delay) {
                return Ok(None);
            }

            let frame = self.read_frame()?;
            let spectrum = self.spectrum(&frame)?;
            if self.mapper.is_gated_on(&spectrum) {
                log::debug!("Signal returned at idle lamp {}", lamp);
                return Ok(Some(spectrum));
            }
        }

        Ok(None)
    }

    fn show(&mut self, lamps: &LampVector) -> Result<(), RunError> {
        let scan = self.encoder.scan(lamps, self.config.mode.appends_sentinel());
        self.transport.write(&scan)?;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<AudioFrame, RunError> {
        self.source
            .read_frame()
            .map_err(|e| RunError::AudioReadFailed(e.to_string()))
    }

    fn spectrum(&mut self, frame: &AudioFrame) -> Result<Spectrum, RunError> {
        self.analyzer
            .spectrum(frame, self.config.sample_rate)
            .map_err(|e| RunError::AudioReadFailed(e.to_string()))
    }
}

/// Start/stop surface around a single worker
pub struct LightOrgan<B: Backend> {
    backend: Arc<B>,
    state: RunState,
    worker: Option<JoinHandle<Result<(), RunError>>>,
}

impl<B: Backend> LightOrgan<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            state: RunState::new(),
            worker: None,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.state.status()
    }

    /// Whether a worker is still alive
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Open the devices and start the worker.
    ///
    /// Returns once both devices are open, or with the open error. Starting
    /// while a run is active does nothing: two transports must never hold the
    /// same port.
    pub fn start(&mut self, config: RunConfig) -> Result<(), RunError> {
        if self.is_running() {
            log::warn!("Start requested while already running, ignoring");
            return Ok(());
        }
        // A worker that ended on its own already published its outcome
        if let Some(finished) = self.worker.take() {
            if let Ok(Err(e)) = finished.join() {
                log::debug!("Discarding previous run outcome: {}", e);
            }
        }

        let config = config.validate()?;

        self.state.arm();
        self.state.set_status(RunStatus::Connecting);

        let (ready_tx, ready_rx) = mpsc::channel::<()>();
        let backend = self.backend.clone();
        let state = self.state.clone();

        let spawned = thread::Builder::new()
            .name("light-organ".to_string())
            .spawn(move || run_worker(backend.as_ref(), config, state, ready_tx));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.state.request_stop();
                self.state.set_status(RunStatus::Idle);
                return Err(RunError::ThreadError(e.to_string()));
            }
        };

        match ready_rx.recv() {
            Ok(()) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(_) => {
                // The worker dropped the ready channel without connecting
                let outcome = join_worker(handle);
                self.state.request_stop();
                self.state.set_status(RunStatus::Idle);
                match outcome {
                    Err(e) => Err(e),
                    Ok(()) => Err(RunError::ThreadError("worker exited before connecting".to_string())),
                }
            }
        }
    }

    /// Clear the running flag and wait for the worker to release its
    /// devices. Returns the run's fault, if it had one.
    pub fn stop(&mut self) -> Result<(), RunError> {
        self.state.request_stop();

        match self.worker.take() {
            Some(handle) => {
                self.state.mark_stopping();
                log::info!("Waiting for worker to stop");
                join_worker(handle)
            }
            None => Ok(()),
        }
    }

    /// Block until the worker exits on its own, without requesting a stop.
    pub fn wait(&mut self) -> Result<(), RunError> {
        match self.worker.take() {
            Some(handle) => join_worker(handle),
            None => Ok(()),
        }
    }
}

impl<B: Backend> Drop for LightOrgan<B> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("Run ended with error during shutdown: {}", e);
        }
    }
}

fn join_worker(handle: JoinHandle<Result<(), RunError>>) -> Result<(), RunError> {
    handle
        .join()
        .map_err(|_| RunError::ThreadError("worker panicked".to_string()))?
}

/// Worker body. Devices are dropped before the final status is published.
fn run_worker<B: Backend>(
    backend: &B,
    config: RunConfig,
    state: RunState,
    ready: mpsc::Sender<()>,
) -> Result<(), RunError> {
    let outcome = connect_and_run(backend, &config, &state, ready);

    state.request_stop();
    match &outcome {
        Ok(()) => state.set_status(RunStatus::Idle),
        Err(e) => {
            log::error!("{}", e);
            state.set_status(RunStatus::Error(e.to_string()));
        }
    }
    outcome
}

fn connect_and_run<B: Backend>(
    backend: &B,
    config: &RunConfig,
    state: &RunState,
    ready: mpsc::Sender<()>,
) -> Result<(), RunError> {
    log::info!("Connecting to serial port {}", config.port);
    let mut transport = backend.open_transport(config)?;

    log::info!("Loading audio device '{}'", config.audio_device);
    let mut source = backend.open_audio(config)?;

    // The controller is waiting on this; it may already be gone on drop
    let _ = ready.send(());

    // Opening the port resets the microcontroller
    if !state.sleep(config.settle_delay()) {
        return Ok(());
    }

    state.set_status(RunStatus::Running);

    let mut coin = ThreadCoin;
    let result = RunLoop::new(config, source.as_mut(), transport.as_mut(), state, &mut coin).run();

    drop(source);
    drop(transport);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::test_signals::{silence, sine};
    use crate::config::Mode;
    use crate::protocol::FRAME_SENTINEL;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Frame size and rate where 468.75 Hz (band 0 for min 500 Hz) and
    /// 750 Hz sit exactly on bins
    const FRAME: usize = 512;
    const RATE: u32 = 48000;

    fn test_config(mode: Mode) -> RunConfig {
        RunConfig {
            port: "/dev/ttyTEST".to_string(),
            sample_rate: RATE,
            channels: 1,
            frame_size: FRAME,
            min_frequency: 500.0,
            max_frequency: 2000.0,
            sensitivity_threshold: 100_000.0,
            delay_seconds: 0.0,
            settle_seconds: 0.0,
            mode,
            ..Default::default()
        }
    }

    fn loud() -> AudioFrame {
        sine(468.75, 10_000.0, RATE, FRAME)
    }

    #[derive(Default)]
    struct Counters {
        transports_opened: AtomicUsize,
        transports_released: AtomicUsize,
        audio_opened: AtomicUsize,
        audio_released: AtomicUsize,
        reads: AtomicUsize,
    }

    struct RecordingTransport {
        written: Arc<Mutex<Vec<u8>>>,
        fail_writes: bool,
        counters: Option<Arc<Counters>>,
    }

    impl RecordingTransport {
        fn new() -> (Self, Arc<Mutex<Vec<u8>>>) {
            let written = Arc::new(Mutex::new(Vec::new()));
            let transport = Self {
                written: written.clone(),
                fail_writes: false,
                counters: None,
            };
            (transport, written)
        }
    }

    impl LampTransport for RecordingTransport {
        fn write(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
            if self.fail_writes {
                return Err(ClientError::WriteFailed("device unplugged".to_string()));
            }
            self.written.lock().extend_from_slice(bytes);
            Ok(())
        }
    }

    impl Drop for RecordingTransport {
        fn drop(&mut self) {
            if let Some(counters) = &self.counters {
                counters.transports_released.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Replays scripted frames, then either stops the run or faults
    struct ScriptedSource {
        frames: VecDeque<AudioFrame>,
        on_exhausted: Exhausted,
        frame_period: Duration,
        counters: Option<Arc<Counters>>,
    }

    #[derive(Clone)]
    enum Exhausted {
        StopRun(RunState),
        Fail,
        Repeat(AudioFrame),
    }

    impl AudioSource for ScriptedSource {
        fn read_frame(&mut self) -> Result<AudioFrame, CaptureError> {
            if let Some(counters) = &self.counters {
                counters.reads.fetch_add(1, Ordering::SeqCst);
            }
            if !self.frame_period.is_zero() {
                thread::sleep(self.frame_period);
            }
            if let Some(frame) = self.frames.pop_front() {
                return Ok(frame);
            }
            match &self.on_exhausted {
                Exhausted::StopRun(state) => {
                    state.request_stop();
                    Ok(silence(FRAME))
                }
                Exhausted::Fail => Err(CaptureError::ReadTimeout(Duration::from_secs(2))),
                Exhausted::Repeat(frame) => Ok(frame.clone()),
            }
        }
    }

    impl Drop for ScriptedSource {
        fn drop(&mut self) {
            if let Some(counters) = &self.counters {
                counters.audio_released.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn scripted(frames: Vec<AudioFrame>, on_exhausted: Exhausted) -> ScriptedSource {
        ScriptedSource {
            frames: frames.into(),
            on_exhausted,
            frame_period: Duration::ZERO,
            counters: None,
        }
    }

    fn run_scripted(config: &RunConfig, frames: Vec<AudioFrame>) -> (Result<(), RunError>, Vec<u8>) {
        let state = RunState::new();
        state.arm();
        let mut source = scripted(frames, Exhausted::StopRun(state.clone()));
        let (mut transport, written) = RecordingTransport::new();
        let mut coin = ThreadCoin;

        let result = RunLoop::new(config, &mut source, &mut transport, &state, &mut coin).run();
        let bytes = written.lock().clone();
        (result, bytes)
    }

    fn scan(lamps: LampVector) -> Vec<u8> {
        CommandEncoder::new(false).scan(&lamps, true)
    }

    #[test]
    fn loud_frame_lights_band_and_closes_scan() {
        let config = test_config(Mode::AmplitudeThreshold);

        let (result, bytes) = run_scripted(&config, vec![loud()]);

        assert!(result.is_ok());
        assert_eq!(&bytes[..9], b"aBCDEFGHH");
    }

    #[test]
    fn quiet_input_runs_full_idle_chase() {
        let config = test_config(Mode::AmplitudeThreshold);
        // one frame to trigger idle, eight quiet polls
        let frames = vec![silence(FRAME); 9];

        let (result, bytes) = run_scripted(&config, frames);

        assert!(result.is_ok());
        let expected: Vec<u8> = (0..NUM_LAMPS).flat_map(|i| scan(LampVector::one_hot(i))).collect();
        assert_eq!(&bytes[..expected.len()], &expected[..]);
    }

    #[test]
    fn returning_signal_aborts_idle_chase() {
        let config = test_config(Mode::AmplitudeThreshold);
        // trigger, quiet after lamps 0..2, signal after lamp 3
        let frames = vec![
            silence(FRAME),
            silence(FRAME),
            silence(FRAME),
            silence(FRAME),
            loud(),
        ];

        let (result, bytes) = run_scripted(&config, frames);

        assert!(result.is_ok());
        let mut expected: Vec<u8> = (0..4).flat_map(|i| scan(LampVector::one_hot(i))).collect();
        // the frame that ended the chase is mapped right away
        expected.extend(scan(LampVector::one_hot(0)));
        assert_eq!(&bytes[..expected.len()], &expected[..]);
        // no lamp 4 step
        assert!(!bytes
            .chunks(9)
            .take(5)
            .any(|chunk| chunk == scan(LampVector::one_hot(4)).as_slice()));
    }

    #[test]
    fn hold_period_releases_lit_lamps() {
        let mut config = test_config(Mode::AmplitudeThreshold);
        config.delay_seconds = 0.005;

        let (result, bytes) = run_scripted(&config, vec![loud()]);

        assert!(result.is_ok());
        assert_eq!(&bytes[..10], b"aBCDEFGHHA");
    }

    #[test]
    fn inverted_run_uses_upper_case_for_lit_lamps() {
        let mut config = test_config(Mode::AmplitudeThreshold);
        config.inversion = true;

        let (result, bytes) = run_scripted(&config, vec![loud()]);

        assert!(result.is_ok());
        assert_eq!(&bytes[..9], b"AbcdefghH");
    }

    #[test]
    fn random_mode_writes_scans_without_sentinel() {
        let config = test_config(Mode::Random);

        let (result, bytes) = run_scripted(&config, vec![loud()]);

        assert!(result.is_ok());
        let first = CommandEncoder::new(false).decode(&bytes[..8]);
        assert!(first.is_some(), "first scan should decode: {:?}", &bytes[..8]);
        assert_ne!(bytes.get(8), Some(&FRAME_SENTINEL));
    }

    #[test]
    fn dominant_mode_lights_lamp_for_loudest_bin() {
        let mut config = test_config(Mode::DominantFrequency);
        config.min_frequency = 468.75;
        config.max_frequency = 1968.75;
        let frame = crate::audio::test_signals::tones(&[(468.75, 2000.0), (1218.75, 8000.0)], RATE, FRAME);

        let (result, bytes) = run_scripted(&config, vec![frame]);

        assert!(result.is_ok());
        assert_eq!(bytes[..9].to_vec(), scan(LampVector::one_hot(4)));
    }

    #[test]
    fn read_fault_ends_run() {
        let config = test_config(Mode::AmplitudeThreshold);
        let state = RunState::new();
        state.arm();
        let mut source = scripted(vec![loud()], Exhausted::Fail);
        let (mut transport, _) = RecordingTransport::new();
        let mut coin = ThreadCoin;

        let result = RunLoop::new(&config, &mut source, &mut transport, &state, &mut coin).run();

        assert!(matches!(result, Err(RunError::AudioReadFailed(_))));
    }

    #[test]
    fn write_fault_ends_run() {
        let config = test_config(Mode::AmplitudeThreshold);
        let state = RunState::new();
        state.arm();
        let mut source = scripted(vec![loud()], Exhausted::Repeat(loud()));
        let (mut transport, _) = RecordingTransport::new();
        transport.fail_writes = true;
        let mut coin = ThreadCoin;

        let result = RunLoop::new(&config, &mut source, &mut transport, &state, &mut coin).run();

        assert!(matches!(result, Err(RunError::TransportWriteFailed(_))));
    }

    #[test]
    fn wrong_sized_frame_is_a_read_fault() {
        let config = test_config(Mode::AmplitudeThreshold);
        let (result, _) = run_scripted(&config, vec![AudioFrame::new(Vec::new())]);

        assert!(matches!(result, Err(RunError::AudioReadFailed(_))));
    }

    // === Controller tests ===

    #[derive(Clone, Default)]
    struct MockBackend {
        counters: Arc<Counters>,
        missing_port: bool,
        missing_device: bool,
        fail_after_reads: Option<usize>,
    }

    impl Backend for MockBackend {
        fn open_transport(&self, config: &RunConfig) -> Result<Box<dyn LampTransport>, RunError> {
            if self.missing_port {
                return Err(ClientError::OpenFailed {
                    port: config.port.clone(),
                    reason: "No such file or directory".to_string(),
                }
                .into());
            }
            self.counters.transports_opened.fetch_add(1, Ordering::SeqCst);
            let (mut transport, _) = RecordingTransport::new();
            transport.counters = Some(self.counters.clone());
            Ok(Box::new(transport))
        }

        fn open_audio(&self, config: &RunConfig) -> Result<Box<dyn AudioSource>, RunError> {
            if self.missing_device {
                return Err(RunError::AudioDeviceNotFound(config.audio_device.clone()));
            }
            self.counters.audio_opened.fetch_add(1, Ordering::SeqCst);
            let frames = match self.fail_after_reads {
                Some(n) => vec![loud(); n],
                None => Vec::new(),
            };
            let on_exhausted = match self.fail_after_reads {
                Some(_) => Exhausted::Fail,
                None => Exhausted::Repeat(loud()),
            };
            Ok(Box::new(ScriptedSource {
                frames: frames.into(),
                on_exhausted,
                frame_period: Duration::from_millis(2),
                counters: Some(self.counters.clone()),
            }))
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn missing_port_never_opens_audio() {
        let backend = MockBackend {
            missing_port: true,
            ..Default::default()
        };
        let counters = backend.counters.clone();
        let mut organ = LightOrgan::new(backend);

        let result = organ.start(test_config(Mode::AmplitudeThreshold));

        assert!(matches!(result, Err(RunError::TransportOpenFailed { .. })));
        assert_eq!(organ.status(), RunStatus::Idle);
        assert!(!organ.is_running());
        assert_eq!(counters.audio_opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_audio_device_releases_transport() {
        let backend = MockBackend {
            missing_device: true,
            ..Default::default()
        };
        let counters = backend.counters.clone();
        let mut organ = LightOrgan::new(backend);

        let result = organ.start(test_config(Mode::AmplitudeThreshold));

        assert!(matches!(result, Err(RunError::AudioDeviceNotFound(_))));
        assert_eq!(organ.status(), RunStatus::Idle);
        assert_eq!(counters.transports_opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.transports_released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalid_config_is_rejected_before_opening_anything() {
        let backend = MockBackend::default();
        let counters = backend.counters.clone();
        let mut organ = LightOrgan::new(backend);
        let mut config = test_config(Mode::AmplitudeThreshold);
        config.min_frequency = f32::NAN;

        let result = organ.start(config);

        assert!(matches!(result, Err(RunError::InvalidConfig(_))));
        assert_eq!(counters.transports_opened.load(Ordering::SeqCst), 0);
        assert_eq!(organ.status(), RunStatus::Idle);
    }

    #[test]
    fn stop_releases_devices_once_and_allows_restart() {
        let backend = MockBackend::default();
        let counters = backend.counters.clone();
        let mut organ = LightOrgan::new(backend);

        organ.start(test_config(Mode::AmplitudeThreshold)).unwrap();
        wait_until(|| organ.status() == RunStatus::Running);
        wait_until(|| counters.reads.load(Ordering::SeqCst) >= 3);

        let stopping = Instant::now();
        organ.stop().unwrap();

        // the mock reads a frame every 2 ms; stop must not wait much longer
        assert!(stopping.elapsed() < Duration::from_millis(250), "stop took {:?}", stopping.elapsed());
        assert_eq!(organ.status(), RunStatus::Idle);
        assert!(!organ.is_running());
        assert_eq!(counters.transports_released.load(Ordering::SeqCst), 1);
        assert_eq!(counters.audio_released.load(Ordering::SeqCst), 1);

        organ.start(test_config(Mode::AmplitudeThreshold)).unwrap();
        assert!(organ.is_running());
        organ.stop().unwrap();

        assert_eq!(counters.transports_opened.load(Ordering::SeqCst), 2);
        assert_eq!(counters.transports_released.load(Ordering::SeqCst), 2);
        assert_eq!(counters.audio_released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn second_start_while_running_is_ignored() {
        let backend = MockBackend::default();
        let counters = backend.counters.clone();
        let mut organ = LightOrgan::new(backend);

        organ.start(test_config(Mode::AmplitudeThreshold)).unwrap();
        organ.start(test_config(Mode::Random)).unwrap();

        assert_eq!(counters.transports_opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.audio_opened.load(Ordering::SeqCst), 1);
        organ.stop().unwrap();
    }

    #[test]
    fn read_fault_tears_down_and_is_reported_once() {
        let backend = MockBackend {
            fail_after_reads: Some(3),
            ..Default::default()
        };
        let counters = backend.counters.clone();
        let mut organ = LightOrgan::new(backend);

        organ.start(test_config(Mode::AmplitudeThreshold)).unwrap();
        wait_until(|| !organ.is_running());

        assert!(matches!(organ.status(), RunStatus::Error(_)));
        assert_eq!(counters.transports_released.load(Ordering::SeqCst), 1);
        assert_eq!(counters.audio_released.load(Ordering::SeqCst), 1);

        assert!(matches!(organ.stop(), Err(RunError::AudioReadFailed(_))));
        assert!(organ.stop().is_ok());
    }

    #[test]
    fn wait_returns_the_fault_that_ended_the_run() {
        let backend = MockBackend {
            fail_after_reads: Some(2),
            ..Default::default()
        };
        let mut organ = LightOrgan::new(backend);

        organ.start(test_config(Mode::AmplitudeThreshold)).unwrap();

        assert!(matches!(organ.wait(), Err(RunError::AudioReadFailed(_))));
        assert!(!organ.is_running());
        assert!(organ.wait().is_ok());
    }

    #[test]
    fn stop_interrupts_settle_delay() {
        let backend = MockBackend::default();
        let counters = backend.counters.clone();
        let mut organ = LightOrgan::new(backend);
        let mut config = test_config(Mode::AmplitudeThreshold);
        config.settle_seconds = 30.0;

        organ.start(config).unwrap();
        assert_eq!(organ.status(), RunStatus::Connecting);

        let started = Instant::now();
        organ.stop().unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(counters.reads.load(Ordering::SeqCst), 0);
        assert_eq!(counters.audio_released.load(Ordering::SeqCst), 1);
        assert_eq!(organ.status(), RunStatus::Idle);
    }

    #[test]
    fn dropping_controller_stops_worker() {
        let backend = MockBackend::default();
        let counters = backend.counters.clone();

        {
            let mut organ = LightOrgan::new(backend);
            organ.start(test_config(Mode::AmplitudeThreshold)).unwrap();
        }

        assert_eq!(counters.transports_released.load(Ordering::SeqCst), 1);
        assert_eq!(counters.audio_released.load(Ordering::SeqCst), 1);
    }
}
