// SPDX-License-Identifier: GPL-3.0-only

//! Camera capture session state machine
//!
//! [`CameraCapture`] drives a [`CameraDevice`] through
//! `STOPPED → OPENING → CONFIGURING → STARTED → STOPPING → STOPPED` and
//! pushes every frame of the running session into a [`VideoProducer`].
//!
//! Device callbacks never run the state machine inline: lifecycle events are
//! queued to the capture's event thread. Frames are handled on whatever
//! thread the device delivers them from and only reach the producer while
//! the session that produced them is `STARTED`.
//!
//! The state lock is never held while calling into the device or the
//! listener.

use super::fps_monitor::FpsMonitor;
use super::types::{
    CameraParameter, CameraState, CaptureRequest, CapturedFrame, DeviceCapabilities, FrameRateSelector,
    closest_frame_rate_range, closest_size, exact_frame_rate_range,
};
use super::{CameraDevice, CameraEvent, CameraEventSink, CameraStateListener, CaptureEventHandler};
use crate::config::PipelineConfig;
use crate::constants::{
    CAPTURE_NOT_STARTED, CameraFacing, DEFAULT_CAPTURE_HEIGHT, DEFAULT_CAPTURE_WIDTH, DEFAULT_FRAME_RATE,
    FPS_REPORT_PERIOD, FREEZE_TIMEOUT, STOP_TIMEOUT,
};
use crate::errors::{CaptureError, CaptureErrorCode, CaptureResult, ChannelError};
use crate::frame::{FrameFormat, TextureKind, VideoFrame};
use crate::pipeline::{TaskLoop, TaskSender, VideoProducer};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Timing knobs for a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTimeouts {
    pub fps_report_period: Duration,
    pub freeze_timeout: Duration,
    pub stop_timeout: Duration,
}

impl Default for CaptureTimeouts {
    fn default() -> Self {
        Self {
            fps_report_period: FPS_REPORT_PERIOD,
            freeze_timeout: FREEZE_TIMEOUT,
            stop_timeout: STOP_TIMEOUT,
        }
    }
}

impl From<&PipelineConfig> for CaptureTimeouts {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            fps_report_period: config.fps_report_period(),
            freeze_timeout: config.freeze_timeout(),
            stop_timeout: config.stop_timeout(),
        }
    }
}

/// Requested capture format, applied by the next allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DesiredFormat {
    width: u32,
    height: u32,
    frame_rate: u32,
    facing: CameraFacing,
    /// Prefer a fixed `[frame_rate, frame_rate]` range when the camera has one
    exact_frame_range: bool,
}

struct CaptureState {
    state: CameraState,
    desired: DesiredFormat,
    /// Replaces the built-in range penalty when set
    frame_rate_selector: Option<FrameRateSelector>,
    request: Option<CaptureRequest>,
    capabilities: Option<DeviceCapabilities>,
    /// Bumped on every open; events from older sessions are ignored
    session: u64,
    /// Last session the device reported closed
    closed_session: u64,
    /// A start arrived while stopping
    pending_start: bool,
    queued_params: Vec<CameraParameter>,
    zoom: f32,
    torch: bool,
    exposure: i32,
    first_frame_seen: bool,
    monitor: Option<FpsMonitor>,
}

impl CaptureState {
    /// Leave a live session; returns the monitor so it is joined unlocked
    fn begin_stop(&mut self) -> Option<FpsMonitor> {
        self.state = CameraState::Stopping;
        self.monitor.take()
    }
}

struct CaptureShared {
    state: Mutex<CaptureState>,
    changed: Condvar,
    device: Mutex<Box<dyn CameraDevice>>,
    producer: VideoProducer,
    listener: Mutex<Option<Arc<dyn CameraStateListener>>>,
    events: OnceLock<TaskSender<()>>,
    timeouts: CaptureTimeouts,
    self_ref: Weak<CaptureShared>,
}

/// One camera and its capture session
pub struct CameraCapture {
    shared: Arc<CaptureShared>,
    events: TaskLoop<()>,
}

impl CameraCapture {
    /// Wrap `device`; frames of running sessions go to `producer`
    pub fn new(
        device: Box<dyn CameraDevice>,
        producer: VideoProducer,
        timeouts: CaptureTimeouts,
    ) -> Result<Self, ChannelError> {
        let events =
            TaskLoop::start_with_init("camera-events", || Ok(()), |_| {}).map_err(ChannelError::ThreadStart)?;

        let shared = Arc::new_cyclic(|self_ref| CaptureShared {
            state: Mutex::new(CaptureState {
                state: CameraState::Stopped,
                desired: DesiredFormat {
                    width: DEFAULT_CAPTURE_WIDTH,
                    height: DEFAULT_CAPTURE_HEIGHT,
                    frame_rate: DEFAULT_FRAME_RATE,
                    facing: CameraFacing::default(),
                    exact_frame_range: false,
                },
                frame_rate_selector: None,
                request: None,
                capabilities: None,
                session: 0,
                closed_session: 0,
                pending_start: false,
                queued_params: Vec::new(),
                zoom: 1.0,
                torch: false,
                exposure: 0,
                first_frame_seen: false,
                monitor: None,
            }),
            changed: Condvar::new(),
            device: Mutex::new(device),
            producer,
            listener: Mutex::new(None),
            events: OnceLock::new(),
            timeouts,
            self_ref: self_ref.clone(),
        });
        let _ = shared.events.set(events.sender());

        Ok(Self { shared, events })
    }

    pub fn producer(&self) -> &VideoProducer {
        &self.shared.producer
    }

    pub fn state(&self) -> CameraState {
        self.shared.lock().state
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn CameraStateListener>>) {
        *self
            .shared
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = listener;
    }

    /// Facing used by the next allocation
    pub fn facing(&self) -> CameraFacing {
        self.shared.lock().desired.facing
    }

    /// Desired settings take effect at the next start; a stopped capture
    /// drops its negotiated format so that start allocates again.
    pub fn set_facing(&self, facing: CameraFacing) {
        self.shared.update_desired(|desired| desired.facing = facing);
    }

    pub fn set_picture_size(&self, width: u32, height: u32) {
        self.shared.update_desired(|desired| {
            desired.width = width;
            desired.height = height;
        });
    }

    pub fn set_ideal_frame_rate(&self, frame_rate: u32) {
        self.shared.update_desired(|desired| desired.frame_rate = frame_rate);
    }

    /// Choose frame-rate ranges with `selector` from the next allocation on
    pub fn set_frame_rate_selector(&self, selector: Option<FrameRateSelector>) {
        let mut state = self.shared.lock();
        state.frame_rate_selector = selector;
        if state.state == CameraState::Stopped {
            state.request = None;
        }
    }

    pub fn enable_exact_frame_range(&self, enabled: bool) {
        self.shared
            .update_desired(|desired| desired.exact_frame_range = enabled);
    }

    /// Format negotiated by the last allocation
    pub fn request(&self) -> Option<CaptureRequest> {
        self.shared.lock().request
    }

    /// Negotiate a capture format with the device
    ///
    /// Only valid while stopped. Failures are also reported to the listener.
    pub fn allocate(&self, width: u32, height: u32, frame_rate: u32, facing: CameraFacing) -> CaptureResult<CaptureRequest> {
        {
            let mut state = self.shared.lock();
            if state.state != CameraState::Stopped {
                return Err(CaptureError::InvalidState {
                    expected: CameraState::Stopped,
                    actual: state.state,
                });
            }
            state.desired = DesiredFormat {
                width,
                height,
                frame_rate,
                facing,
                exact_frame_range: state.desired.exact_frame_range,
            };
        }
        self.shared.allocate_desired()
    }

    /// Forget the negotiated format. Only valid while stopped.
    pub fn deallocate(&self) -> CaptureResult<()> {
        let mut state = self.shared.lock();
        if state.state != CameraState::Stopped {
            return Err(CaptureError::InvalidState {
                expected: CameraState::Stopped,
                actual: state.state,
            });
        }
        state.request = None;
        state.capabilities = None;
        state.queued_params.clear();
        debug!("Capture deallocated");
        Ok(())
    }

    /// Open the device and start streaming
    ///
    /// Allocates from the desired format first if needed. A start issued
    /// while stopping is replayed once the device reports closed.
    pub fn start_capture(&self) -> CaptureResult<()> {
        self.shared.start_capture()
    }

    /// Stop streaming and wait until no more frames will be delivered
    ///
    /// On the capture event thread this only initiates the stop.
    pub fn stop_capture_and_block_until_stopped(&self) -> CaptureResult<()> {
        self.shared.stop_capture()
    }

    /// Wait up to `timeout` for `state`; returns whether it was reached
    pub fn wait_for_state(&self, expected: CameraState, timeout: Duration) -> bool {
        let state = self.shared.lock();
        let (state, _) = self
            .shared
            .changed
            .wait_timeout_while(state, timeout, |state| state.state != expected)
            .unwrap_or_else(PoisonError::into_inner);
        state.state == expected
    }

    pub fn is_started(&self) -> bool {
        self.state() == CameraState::Started
    }

    /// Whether the allocated camera can zoom; false before allocation
    pub fn is_zoom_supported(&self) -> bool {
        self.shared
            .lock()
            .capabilities
            .as_ref()
            .is_some_and(|caps| caps.max_zoom > 1.0)
    }

    // ===== Parameters =====

    /// Set zoom, clamped to `[1, max_zoom]` once the limits are known
    pub fn set_zoom(&self, zoom: f32) -> CaptureResult<()> {
        let zoom = {
            let state = self.shared.lock();
            match &state.capabilities {
                Some(caps) => zoom.clamp(1.0, caps.max_zoom.max(1.0)),
                None => zoom.max(1.0),
            }
        };
        self.shared.apply_or_queue(CameraParameter::Zoom(zoom))
    }

    pub fn set_torch(&self, enabled: bool) -> CaptureResult<()> {
        self.shared.apply_or_queue(CameraParameter::Torch(enabled))
    }

    pub fn set_exposure(&self, exposure: i32) -> CaptureResult<()> {
        let exposure = {
            let state = self.shared.lock();
            match &state.capabilities {
                Some(caps) => exposure.clamp(caps.exposure_range.0, caps.exposure_range.1),
                None => exposure,
            }
        };
        self.shared.apply_or_queue(CameraParameter::Exposure(exposure))
    }

    /// Maximum zoom, or `CAPTURE_NOT_STARTED` before capture starts
    pub fn max_zoom(&self) -> f32 {
        self.shared
            .started_value(|_, caps| caps.map_or(1.0, |caps| caps.max_zoom))
            .unwrap_or(CAPTURE_NOT_STARTED as f32)
    }

    /// Current zoom, or `CAPTURE_NOT_STARTED` before capture starts
    pub fn zoom(&self) -> f32 {
        self.shared
            .started_value(|state, _| state.zoom)
            .unwrap_or(CAPTURE_NOT_STARTED as f32)
    }

    /// Current exposure compensation, or `CAPTURE_NOT_STARTED`
    pub fn exposure(&self) -> i32 {
        self.shared
            .started_value(|state, _| state.exposure)
            .unwrap_or(CAPTURE_NOT_STARTED)
    }

    pub fn min_exposure(&self) -> i32 {
        self.shared
            .started_value(|_, caps| caps.map_or(0, |caps| caps.exposure_range.0))
            .unwrap_or(CAPTURE_NOT_STARTED)
    }

    pub fn max_exposure(&self) -> i32 {
        self.shared
            .started_value(|_, caps| caps.map_or(0, |caps| caps.exposure_range.1))
            .unwrap_or(CAPTURE_NOT_STARTED)
    }

    /// Whether the running camera has a flash; false before capture starts
    pub fn torch_supported(&self) -> bool {
        self.shared
            .started_value(|_, caps| caps.is_some_and(|caps| caps.has_flash))
            .unwrap_or(false)
    }

    pub fn torch(&self) -> bool {
        self.shared.lock().torch
    }

    /// Parameters waiting for the next configured session
    pub fn queued_parameters(&self) -> Vec<CameraParameter> {
        self.shared.lock().queued_params.clone()
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        if let Err(e) = self.shared.stop_capture() {
            warn!(error = %e, "Capture did not stop cleanly on drop");
        }
        self.events.quit();
    }
}

impl CaptureShared {
    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn device(&self) -> MutexGuard<'_, Box<dyn CameraDevice>> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listener(&self) -> Option<Arc<dyn CameraStateListener>> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_desired(&self, update: impl FnOnce(&mut DesiredFormat)) {
        let mut state = self.lock();
        let before = state.desired;
        update(&mut state.desired);
        if state.desired != before && state.state == CameraState::Stopped {
            state.request = None;
        }
    }

    fn is_event_thread(&self) -> bool {
        self.events.get().is_some_and(TaskSender::is_loop_thread)
    }

    fn report_error(&self, code: CaptureErrorCode, message: &str) {
        warn!(code = %code, message, "Camera capture error");
        if let Some(listener) = self.listener() {
            listener.on_camera_capture_error(code, message);
        }
    }

    fn started_value<T>(&self, read: impl FnOnce(&CaptureState, Option<&DeviceCapabilities>) -> T) -> Option<T> {
        let guard = self.lock();
        let state = &*guard;
        (state.state == CameraState::Started).then(|| read(state, state.capabilities.as_ref()))
    }

    fn allocate_desired(&self) -> CaptureResult<CaptureRequest> {
        let desired = self.lock().desired;
        match self.negotiate(desired) {
            Ok((request, capabilities)) => {
                let mut state = self.lock();
                state.request = Some(request);
                state.capabilities = Some(capabilities);
                info!(
                    facing = %request.facing,
                    size = %request.size,
                    fps = %request.fps_range,
                    "Capture allocated"
                );
                Ok(request)
            }
            Err(e) => {
                let code = match &e {
                    CaptureError::Device(kind) => CaptureErrorCode::from_device_error(kind.clone()),
                    _ => CaptureErrorCode::Allocate,
                };
                self.report_error(code, &e.to_string());
                Err(e)
            }
        }
    }

    fn negotiate(&self, desired: DesiredFormat) -> CaptureResult<(CaptureRequest, DeviceCapabilities)> {
        let selector = self.lock().frame_rate_selector.clone();
        let capabilities = self
            .device()
            .capabilities(desired.facing)
            .map_err(CaptureError::Device)?;
        let size = closest_size(&capabilities.sizes, desired.width, desired.height).ok_or(
            CaptureError::NoMatchingResolution {
                width: desired.width,
                height: desired.height,
            },
        )?;
        let ranges = &capabilities.fps_ranges;
        let exact = desired
            .exact_frame_range
            .then(|| exact_frame_rate_range(ranges, desired.frame_rate))
            .flatten();
        let fps_range = exact
            .or_else(|| match &selector {
                Some(select) => select(ranges, desired.frame_rate),
                None => closest_frame_rate_range(ranges, desired.frame_rate),
            })
            .ok_or(CaptureError::NoFrameRateRange)?;
        Ok((
            CaptureRequest {
                facing: desired.facing,
                size,
                fps_range,
            },
            capabilities,
        ))
    }

    fn start_capture(&self) -> CaptureResult<()> {
        let needs_allocation = {
            let mut state = self.lock();
            match state.state {
                CameraState::Stopping => {
                    debug!("Start requested while stopping, deferring");
                    state.pending_start = true;
                    return Ok(());
                }
                CameraState::Opening | CameraState::Configuring | CameraState::Started => return Ok(()),
                CameraState::Stopped => state.request.is_none(),
            }
        };
        if needs_allocation {
            self.allocate_desired()?;
        }

        let (session, request) = {
            let mut state = self.lock();
            if state.state != CameraState::Stopped {
                return Ok(());
            }
            let Some(request) = state.request else {
                return Err(CaptureError::NotStarted);
            };
            state.session += 1;
            state.state = CameraState::Opening;
            state.first_frame_seen = false;
            self.changed.notify_all();
            (state.session, request)
        };

        info!(session, facing = %request.facing, size = %request.size, "Opening camera");
        let handler: Weak<dyn CaptureEventHandler> = self.self_ref.clone();
        let sink = CameraEventSink::new(session, handler);
        let opened = self.device().open(&request, sink);

        if let Err(kind) = opened {
            {
                let mut state = self.lock();
                if state.session == session && state.state == CameraState::Opening {
                    state.state = CameraState::Stopped;
                    self.changed.notify_all();
                }
            }
            self.report_error(CaptureErrorCode::from_device_error(kind.clone()), &kind.to_string());
            return Err(CaptureError::Device(kind));
        }
        Ok(())
    }

    fn stop_capture(&self) -> CaptureResult<()> {
        let (close, monitor, session) = {
            let mut state = self.lock();
            state.pending_start = false;
            match state.state {
                CameraState::Stopped => return Ok(()),
                CameraState::Stopping => (false, None, state.session),
                CameraState::Opening | CameraState::Configuring | CameraState::Started => {
                    let monitor = state.begin_stop();
                    self.changed.notify_all();
                    (true, monitor, state.session)
                }
            }
        };
        drop(monitor);

        if close {
            info!("Stopping camera");
            self.device().close();
        }

        if self.is_event_thread() {
            // the closed event is handled on this thread after we return
            return Ok(());
        }

        // A start deferred while stopping may reopen right after the close,
        // so the closed session counts as stopped too
        let stopped = |state: &CaptureState| state.state == CameraState::Stopped || state.closed_session >= session;
        let state = self.lock();
        let (state, timeout) = self
            .changed
            .wait_timeout_while(state, self.timeouts.stop_timeout, |state| !stopped(&*state))
            .unwrap_or_else(PoisonError::into_inner);
        if timeout.timed_out() && !stopped(&*state) {
            warn!(state = %state.state, "Timed out waiting for camera to stop");
            return Err(CaptureError::StopTimeout);
        }
        Ok(())
    }

    fn apply_or_queue(&self, parameter: CameraParameter) -> CaptureResult<()> {
        {
            let mut state = self.lock();
            if state.state != CameraState::Started {
                state.queued_params.retain(|queued| !queued.same_kind(&parameter));
                state.queued_params.push(parameter);
                debug!(?parameter, "Capture not started, parameter queued");
                return Ok(());
            }
        }
        self.device()
            .apply_parameter(parameter)
            .map_err(CaptureError::Device)?;
        self.record_parameter(parameter);
        Ok(())
    }

    fn record_parameter(&self, parameter: CameraParameter) {
        let mut state = self.lock();
        match parameter {
            CameraParameter::Zoom(zoom) => state.zoom = zoom,
            CameraParameter::Torch(torch) => state.torch = torch,
            CameraParameter::Exposure(exposure) => state.exposure = exposure,
        }
    }

    fn start_monitor(&self) -> FpsMonitor {
        let weak = self.self_ref.clone();
        let sender = self.events.get().cloned();
        FpsMonitor::start(
            self.timeouts.fps_report_period,
            self.timeouts.freeze_timeout,
            Box::new(move || {
                let weak = weak.clone();
                let report = move |_: &mut ()| {
                    if let Some(shared) = weak.upgrade() {
                        shared.report_error(CaptureErrorCode::CameraFreezed, "no frames received from camera");
                    }
                };
                if let Some(sender) = &sender {
                    sender.post(report);
                }
            }),
        )
    }

    /// Runs on the event thread
    fn handle_event(&self, session: u64, event: CameraEvent) {
        let mut state = self.lock();
        if state.session != session {
            trace!(session, current = state.session, ?event, "Ignoring event from stale session");
            return;
        }
        debug!(session, ?event, state = %state.state, "Camera event");

        match event {
            CameraEvent::Opened => {
                if state.state != CameraState::Opening {
                    return;
                }
                state.state = CameraState::Configuring;
                self.changed.notify_all();
                drop(state);
                if let Some(listener) = self.listener() {
                    listener.on_camera_open();
                }
            }
            CameraEvent::Configured => {
                if state.state != CameraState::Configuring {
                    return;
                }
                state.state = CameraState::Started;
                let queued = std::mem::take(&mut state.queued_params);
                drop(state);

                for parameter in queued {
                    match self.device().apply_parameter(parameter) {
                        Ok(()) => self.record_parameter(parameter),
                        Err(kind) => warn!(?parameter, error = %kind, "Failed to apply queued parameter"),
                    }
                }
                let monitor = self.start_monitor();

                let mut state = self.lock();
                if state.session == session && state.state == CameraState::Started {
                    state.monitor = Some(monitor);
                }
                self.changed.notify_all();
                info!(session, "Camera capture started");
            }
            CameraEvent::ConfigureFailed(reason) => {
                drop(state);
                self.fail(CaptureErrorCode::CameraDevice, &format!("configure failed: {}", reason));
            }
            CameraEvent::Disconnected => {
                drop(state);
                self.fail(CaptureErrorCode::CameraDisconnected, "camera disconnected");
            }
            CameraEvent::Error(kind) => {
                drop(state);
                self.fail(CaptureErrorCode::from_device_error(kind.clone()), &kind.to_string());
            }
            CameraEvent::Closed => {
                state.state = CameraState::Stopped;
                state.closed_session = session;
                let monitor = state.monitor.take();
                let pending_start = std::mem::take(&mut state.pending_start);
                self.changed.notify_all();
                drop(state);
                drop(monitor);

                info!(session, "Camera closed");
                if let Some(listener) = self.listener() {
                    listener.on_camera_closed();
                }
                if pending_start && let Err(e) = self.start_capture() {
                    warn!(error = %e, "Deferred start failed");
                }
            }
        }
    }

    /// Report a runtime failure and force the session down
    fn fail(&self, code: CaptureErrorCode, message: &str) {
        let (close, monitor) = {
            let mut state = self.lock();
            match state.state {
                CameraState::Opening | CameraState::Configuring | CameraState::Started => {
                    let monitor = state.begin_stop();
                    self.changed.notify_all();
                    (true, monitor)
                }
                CameraState::Stopping | CameraState::Stopped => (false, None),
            }
        };
        drop(monitor);
        self.report_error(code, message);
        if close {
            self.device().close();
        }
    }

    /// Pipeline frame for `captured`, or None when it carries no pixels
    fn build_frame(state: &CaptureState, captured: CapturedFrame) -> Option<VideoFrame> {
        let facing = state.request.map_or(state.desired.facing, |request| request.facing);
        let rotation = state
            .capabilities
            .as_ref()
            .map(|caps| caps.sensor_orientation)
            .unwrap_or_default();

        let mut frame = match (captured.source, captured.image) {
            (Some(source), image) => {
                let format = FrameFormat {
                    facing,
                    ..FrameFormat::new(captured.width, captured.height, TextureKind::External)
                };
                let mut frame = VideoFrame::from_source(format, source);
                frame.image = image;
                frame
            }
            (None, Some(image)) => {
                let format = FrameFormat {
                    facing,
                    ..FrameFormat::new(captured.width, captured.height, TextureKind::Texture2D)
                };
                VideoFrame::from_image(format, image)
            }
            (None, None) => return None,
        };
        frame.timestamp = captured.timestamp;
        Some(frame.with_rotation(rotation).with_mirrored(facing.is_mirrored()))
    }
}

impl CaptureEventHandler for CaptureShared {
    fn on_event(&self, session: u64, event: CameraEvent) {
        let Some(sender) = self.events.get() else {
            return;
        };
        // teardown jumps the queue; stale lifecycle events behind it are ignored
        let teardown = matches!(
            event,
            CameraEvent::Closed | CameraEvent::Disconnected | CameraEvent::Error(_)
        );
        let weak = self.self_ref.clone();
        let task = move |_: &mut ()| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_event(session, event);
            }
        };
        let posted = if teardown {
            sender.post_at_front(task)
        } else {
            sender.post(task)
        };
        if !posted {
            trace!(session, "Event thread gone, camera event dropped");
        }
    }

    fn on_frame(&self, session: u64, frame: CapturedFrame) {
        let first_frame = {
            let mut state = self.lock();
            if state.state != CameraState::Started || state.session != session {
                trace!(session, "Frame outside a started session dropped");
                return;
            }
            let (width, height) = (frame.width, frame.height);
            let Some(frame) = Self::build_frame(&state, frame) else {
                warn!(width, height, "Captured frame carries no image, dropped");
                return;
            };
            self.producer.push_frame(frame);
            if let Some(monitor) = &state.monitor {
                monitor.frame();
            }
            if state.first_frame_seen {
                None
            } else {
                state.first_frame_seen = true;
                Some((width, height))
            }
        };

        if let Some((width, height)) = first_frame {
            info!(width, height, "First frame captured");
            if let Some(listener) = self.listener() {
                listener.on_first_captured_frame(width, height);
            }
        }
    }
}
