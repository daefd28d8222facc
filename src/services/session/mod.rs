//! Session controller - owns all per-connection state
//!
//! A single task owns the controller. Link events and the render tick are
//! multiplexed with `tokio::select!`, so no lock guards session state:
//! - Inbound frames are parsed and dispatched to the tile store, tour index,
//!   outbound queue or photo trigger
//! - Location fixes update dirty flags, the slope estimate and tile requests
//! - The tick renders dirty regions, polls the battery and dims the backlight
//!   after a period of inactivity

mod handlers;

use crate::domain::types::{DirtyFlags, Location};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::display::DisplaySink;
use crate::io::link::LinkEvent;
use crate::render::{MapScene, Renderer, WidgetState};
use crate::services::battery::BatteryMonitor;
use crate::services::outbound::{FrameSink, OutboundQueue};
use crate::services::photo::PhotoTrigger;
use crate::services::tile_store::TileStore;
use crate::services::tour_index::TourIndex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Route points are gathered from this many tiles around the rider
pub const ROUTE_QUERY_RADIUS: u32 = 3;

/// Backlight level until the peer sets one
pub const DEFAULT_BACKLIGHT: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// Link up, render loop not started yet
    ConnectedIdle,
    ConnectedActive,
    /// Still connected, backlight off after inactivity
    Inactive,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::ConnectedIdle => "connected_idle",
            SessionState::ConnectedActive => "connected_active",
            SessionState::Inactive => "inactive",
        }
    }

    pub fn is_connected(&self) -> bool {
        !matches!(self, SessionState::Disconnected)
    }
}

/// Collaborators the session drives
pub struct Peripherals<S, D> {
    pub link: S,
    pub display: D,
    pub renderer: Renderer,
    pub tiles: TileStore,
    pub photo: PhotoTrigger,
    pub battery: BatteryMonitor,
}

pub struct SessionController<S: FrameSink, D: DisplaySink> {
    pub(crate) state: SessionState,
    pub(crate) tiles: TileStore,
    pub(crate) tour: TourIndex,
    pub(crate) outbound: OutboundQueue<S>,
    pub(crate) display: D,
    pub(crate) renderer: Renderer,
    pub(crate) photo: PhotoTrigger,
    pub(crate) battery: BatteryMonitor,
    /// Latest fix; meaningless until `has_fix`
    pub(crate) location: Location,
    pub(crate) has_fix: bool,
    /// Oldest first, capped at `config.location_history()`
    pub(crate) history: VecDeque<Location>,
    /// Radians
    pub(crate) slope: f64,
    /// Active map zoom from the latest fix
    pub(crate) zoom: u8,
    pub(crate) backlight: u8,
    pub(crate) dirty: DirtyFlags,
    pub(crate) last_activity: Instant,
    pub(crate) config: Config,
    pub(crate) metrics: Arc<Metrics>,
}

impl<S: FrameSink, D: DisplaySink> SessionController<S, D> {
    pub fn new(config: Config, peripherals: Peripherals<S, D>, metrics: Arc<Metrics>) -> Self {
        let Peripherals { link, display, renderer, tiles, photo, battery } = peripherals;
        let history = VecDeque::with_capacity(config.location_history());
        Self {
            state: SessionState::Disconnected,
            tiles,
            tour: TourIndex::new(),
            outbound: OutboundQueue::new(link),
            display,
            renderer,
            photo,
            battery,
            location: Location::default(),
            has_fix: false,
            history,
            slope: 0.0,
            zoom: 0,
            backlight: DEFAULT_BACKLIGHT,
            dirty: DirtyFlags::default(),
            last_activity: Instant::now(),
            config,
            metrics,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn dirty(&self) -> DirtyFlags {
        self.dirty
    }

    pub fn backlight(&self) -> u8 {
        self.backlight
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    /// Zoom of the latest fix; the tour and tile store follow it
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    pub fn tiles(&self) -> &TileStore {
        &self.tiles
    }

    pub fn tour(&self) -> &TourIndex {
        &self.tour
    }

    pub fn outbound(&self) -> &OutboundQueue<S> {
        &self.outbound
    }

    /// Own the session until the link channel closes or shutdown is signalled
    pub async fn run(&mut self, mut link_rx: mpsc::Receiver<LinkEvent>, mut shutdown: watch::Receiver<bool>) {
        let mut render_tick = interval(Duration::from_millis(self.config.render_interval_ms()));
        render_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            render_interval_ms = self.config.render_interval_ms(),
            inactivity_timeout_ms = self.config.inactivity_timeout_ms(),
            request_radius = self.config.request_radius(),
            "session_started"
        );

        loop {
            tokio::select! {
                event = link_rx.recv() => {
                    match event {
                        Some(e) => self.process_link_event(e, Instant::now()),
                        None => break,
                    }
                }
                _ = render_tick.tick() => {
                    self.tick(Instant::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if self.state.is_connected() {
            self.on_disconnected();
        }
        info!("session_stopped");
    }

    pub fn process_link_event(&mut self, event: LinkEvent, now: Instant) {
        match event {
            LinkEvent::Connected => {
                if self.state.is_connected() {
                    // missed disconnect; start from a clean slate
                    warn!("session_reconnect_without_disconnect");
                    self.on_disconnected();
                }
                self.on_connected(now);
                self.start(now);
            }
            LinkEvent::Frame(frame) => self.on_frame(&frame, now),
            LinkEvent::Disconnected => {
                if self.state.is_connected() {
                    self.on_disconnected();
                }
            }
        }
    }

    pub fn on_connected(&mut self, now: Instant) {
        self.state = SessionState::ConnectedIdle;
        self.last_activity = now;
        info!(state = self.state.as_str(), "session_connected");
    }

    /// Start rendering: full redraw at the stored backlight level
    pub fn start(&mut self, now: Instant) {
        if self.state != SessionState::ConnectedIdle {
            return;
        }
        self.state = SessionState::ConnectedActive;
        self.last_activity = now;
        self.dirty = DirtyFlags::ALL;
        self.display.set_backlight(self.backlight);
        debug!(backlight = self.backlight, "session_render_started");
    }

    /// Drop every piece of per-connection state
    pub fn on_disconnected(&mut self) {
        info!(
            tiles = self.tiles.tile_count(),
            route_points = self.tour.points().len(),
            pending_outbound = self.outbound.pending_len(),
            "session_disconnected"
        );
        self.state = SessionState::Disconnected;
        self.outbound.reset();
        self.tiles.reset();
        self.tour.clear(None);
        self.tour.reset_points_of_interest(0);
        self.tour.set_zoom(0);
        self.zoom = 0;
        self.history.clear();
        self.has_fix = false;
        self.slope = 0.0;
        self.dirty = DirtyFlags::default();
    }

    /// Something the rider would care about happened
    pub fn register_activity(&mut self, now: Instant) {
        self.last_activity = now;
        if self.state == SessionState::Inactive {
            self.state = SessionState::ConnectedActive;
            self.display.set_backlight(self.backlight);
            info!(backlight = self.backlight, "session_woke");
        }
    }

    /// Periodic work: inactivity check, battery poll, render
    pub fn tick(&mut self, now: Instant) {
        if !self.state.is_connected() {
            return;
        }
        self.check_inactivity(now);
        if self.battery.update(now) {
            self.dirty.battery = true;
        }
        self.render_frame();
    }

    fn check_inactivity(&mut self, now: Instant) {
        if self.state != SessionState::ConnectedActive {
            return;
        }
        let idle_ms = now.saturating_duration_since(self.last_activity).as_millis() as u64;
        if idle_ms >= self.config.inactivity_timeout_ms() {
            self.state = SessionState::Inactive;
            self.display.set_backlight(0);
            info!(idle_ms, "session_inactive");
        }
    }

    /// Draw whatever is dirty; on failure the flags are kept for the next tick
    pub fn render_frame(&mut self) {
        if self.state != SessionState::ConnectedActive || !self.has_fix || !self.dirty.any() {
            return;
        }
        let dirty = self.dirty.take();
        let started = Instant::now();

        let route = if dirty.map {
            self.tour.nearby_points(self.location.latitude, self.location.longitude, ROUTE_QUERY_RADIUS)
        } else {
            Arc::from(Vec::new())
        };
        let scene = MapScene {
            tiles: &self.tiles,
            route: &route,
            points_of_interest: self.tour.points_of_interest(),
            location: &self.location,
            zoom: self.zoom,
        };
        let widgets = WidgetState {
            speed_kmh: self.location.speed,
            heading: self.location.heading,
            slope: self.slope,
            battery_percentage: self.battery.percentage(),
            overheated: self.battery.is_overheated(),
        };

        match self.renderer.render(dirty, &scene, &widgets, &self.display) {
            Ok(()) => {
                self.metrics.record_render(started.elapsed().as_micros() as u64);
            }
            Err(e) => {
                warn!(error = %e, "render_failed");
                self.metrics.record_render_failure();
                self.dirty.merge(dirty);
            }
        }
    }
}
