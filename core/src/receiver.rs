use crate::audio::{CaptureDevice, CaptureStream, MemoryCapture, WindowStatus};
use crate::calibration::{NoiseCalibrator, NoiseProfile};
use crate::config::ProtocolConfig;
use crate::error::{ModemError, Result};
use crate::frame_decoder::{FrameDecoder, FrameEvent, ReceiverState};
use crate::spectrum::SpectralAnalyzer;
use crate::stabilizer::DetectionStabilizer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

/// Cross-thread request to stop a running receive loop
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a receive loop reports to its caller
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiverEvent {
    Calibrated(NoiseProfile),
    Frame(FrameEvent),
}

/// Capture stream that keeps track of stream time
struct ClockedStream<S> {
    inner: S,
    samples_read: u64,
    sample_rate: u32,
}

impl<S: CaptureStream> ClockedStream<S> {
    fn seconds(&self) -> f64 {
        self.samples_read as f64 / self.sample_rate as f64
    }
}

impl<S: CaptureStream> CaptureStream for ClockedStream<S> {
    fn read_window(&mut self, window: &mut [f32]) -> Result<WindowStatus> {
        let result = self.inner.read_window(window);
        // An overrun still consumes the window's worth of time
        if matches!(result, Ok(WindowStatus::Ready) | Err(ModemError::StreamOverflow)) {
            self.samples_read += window.len() as u64;
        }
        result
    }
}

/// Listens on a capture device and turns ultrasonic frames into events
pub struct Receiver<D: CaptureDevice> {
    device: D,
    config: ProtocolConfig,
}

impl<D: CaptureDevice> Receiver<D> {
    pub fn new(device: D, config: &ProtocolConfig) -> Result<Self> {
        config.validate()?;
        // Surface table collisions here rather than at start()
        FrameDecoder::new(config)?;
        Ok(Self {
            device,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Open the capture stream and calibrate against the ambient noise.
    ///
    /// The stream belongs to the returned session and is closed when the
    /// session is dropped.
    pub fn start(&mut self) -> Result<ReceiverSession<D::Stream>> {
        let stream = self
            .device
            .open_capture(self.config.sample_rate, self.config.window_size)?;
        log::info!(
            "Capture open at {} Hz, {} sample windows",
            self.config.sample_rate,
            self.config.window_size
        );
        ReceiverSession::new(stream, &self.config)
    }

    /// Start a session and run it until the stream ends or `stop` is raised
    pub fn run<F>(&mut self, stop: &StopSignal, on_event: F) -> Result<()>
    where
        F: FnMut(ReceiverEvent),
    {
        self.start()?.run(stop, on_event)
    }
}

/// An open capture stream with its analysis pipeline
pub struct ReceiverSession<S: CaptureStream> {
    stream: ClockedStream<S>,
    config: ProtocolConfig,
    analyzer: SpectralAnalyzer,
    calibrator: NoiseCalibrator,
    stabilizer: DetectionStabilizer,
    decoder: FrameDecoder,
    profile: NoiseProfile,
    window: Vec<f32>,
}

impl<S: CaptureStream> ReceiverSession<S> {
    fn new(stream: S, config: &ProtocolConfig) -> Result<Self> {
        let mut stream = ClockedStream {
            inner: stream,
            samples_read: 0,
            sample_rate: config.sample_rate,
        };
        let mut analyzer = SpectralAnalyzer::new(config)?;
        let calibrator = NoiseCalibrator::new(config);

        let profile = if config.calibration_seconds > 0.0 {
            calibrator.calibrate(&mut stream, &mut analyzer, config.calibration_seconds)?
        } else {
            calibrator.fallback()
        };

        Ok(Self {
            stream,
            config: config.clone(),
            analyzer,
            stabilizer: DetectionStabilizer::new(config, &profile),
            decoder: FrameDecoder::new(config)?,
            calibrator,
            profile,
            window: vec![0.0; config.window_size],
        })
    }

    pub fn noise_profile(&self) -> &NoiseProfile {
        &self.profile
    }

    pub fn state(&self) -> ReceiverState {
        self.decoder.state()
    }

    /// Seconds of audio consumed from the stream so far
    pub fn elapsed_seconds(&self) -> f64 {
        self.stream.seconds()
    }

    /// Measure the noise floor again.
    ///
    /// Only runs while no frame is in progress; returns `None` otherwise.
    pub fn recalibrate(&mut self) -> Result<Option<NoiseProfile>> {
        if !self.decoder.is_idle() {
            log::debug!("Frame in progress, recalibration skipped");
            return Ok(None);
        }
        let profile = self.calibrator.calibrate(
            &mut self.stream,
            &mut self.analyzer,
            self.config.calibration_seconds,
        )?;
        self.profile = profile;
        self.stabilizer.set_noise_floor(&profile);
        self.stabilizer.reset();
        Ok(Some(profile))
    }

    /// Read and process one window, appending any frame events to `events`.
    ///
    /// An overrun drops the window and breaks any persistence run, but a tone
    /// already confirmed stays latched. It is not an error for the caller.
    pub fn step(&mut self, events: &mut Vec<FrameEvent>) -> Result<WindowStatus> {
        match self.stream.read_window(&mut self.window) {
            Ok(WindowStatus::Ready) => {}
            Ok(WindowStatus::Exhausted) => return Ok(WindowStatus::Exhausted),
            Err(ModemError::StreamOverflow) => {
                log::warn!("Capture overrun at {:.3} s, window dropped", self.stream.seconds());
                self.stabilizer.drop_window();
                return Ok(WindowStatus::Ready);
            }
            Err(e) => return Err(e),
        }

        let now = self.stream.seconds();
        let detection = self.analyzer.analyze(&self.window, now)?;

        if let Some(event) = self.decoder.poll(now) {
            events.push(event);
        }
        if let Some(symbol) = self.stabilizer.push(&detection) {
            if let Some(event) = self.decoder.feed(symbol) {
                events.push(event);
            }
        }
        Ok(WindowStatus::Ready)
    }

    /// Abandon the frame in progress, if any
    pub fn cancel(&mut self) -> Option<FrameEvent> {
        self.stabilizer.reset();
        self.decoder.cancel()
    }

    /// Process windows until the stream is exhausted or `stop` is raised.
    ///
    /// Consumes the session, so the stream is closed on every exit path.
    pub fn run<F>(mut self, stop: &StopSignal, mut on_event: F) -> Result<()>
    where
        F: FnMut(ReceiverEvent),
    {
        on_event(ReceiverEvent::Calibrated(self.profile));

        let mut events = Vec::new();
        loop {
            if stop.is_stopped() {
                log::info!("Stop requested at {:.3} s", self.stream.seconds());
                break;
            }
            let status = self.step(&mut events)?;
            for event in events.drain(..) {
                on_event(ReceiverEvent::Frame(event));
            }
            if status == WindowStatus::Exhausted {
                log::info!("Capture stream ended at {:.3} s", self.stream.seconds());
                break;
            }
        }

        if let Some(event) = self.cancel() {
            on_event(ReceiverEvent::Frame(event));
        }
        Ok(())
    }
}

/// A receive loop running on its own thread
pub struct ReceiverHandle {
    events: mpsc::Receiver<ReceiverEvent>,
    stop: StopSignal,
    thread: JoinHandle<Result<()>>,
}

impl ReceiverHandle {
    pub fn events(&self) -> &mpsc::Receiver<ReceiverEvent> {
        &self.events
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Wait for the loop to finish and return its result
    pub fn join(self) -> Result<()> {
        self.thread.join().map_err(|_| {
            ModemError::DeviceUnavailable("receiver thread panicked".to_string())
        })?
    }
}

/// Run `receiver` on a dedicated thread, delivering events over a channel.
///
/// The loop ends when the stream is exhausted, the stop signal is raised or
/// every event receiver has been dropped.
pub fn spawn<D>(mut receiver: Receiver<D>, stop: StopSignal) -> ReceiverHandle
where
    D: CaptureDevice + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let loop_stop = stop.clone();
    let thread = thread::spawn(move || {
        let disconnect = loop_stop.clone();
        receiver.run(&loop_stop, |event| {
            if tx.send(event).is_err() {
                disconnect.stop();
            }
        })
    });

    ReceiverHandle {
        events: rx,
        stop,
        thread,
    }
}

/// Decode a recorded buffer at the configured sample rate.
///
/// Calibration is skipped and the configured fallback floor is used. A frame
/// still open when the buffer ends is reported as `Cancelled`.
pub fn decode_samples(config: &ProtocolConfig, samples: &[f32]) -> Result<Vec<FrameEvent>> {
    let config = ProtocolConfig {
        calibration_seconds: 0.0,
        ..config.clone()
    };
    let mut receiver = Receiver::new(MemoryCapture::new(samples.to_vec()), &config)?;

    let mut events = Vec::new();
    receiver.run(&StopSignal::new(), |event| {
        if let ReceiverEvent::Frame(frame) = event {
            events.push(frame);
        }
    })?;
    Ok(events)
}
