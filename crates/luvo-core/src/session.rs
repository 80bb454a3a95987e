//! Lamp session: one connected lamp and its state

use crate::config::SessionConfig;
use crate::error::{CallerError, LampError};
use crate::navigator::{self, NavigationOutcome};
use crate::scene::{Scene, SceneCache};
use luvo_protocol::{
    color, Characteristic, Command, DecodeError, Direction, Exchange, Hsb, Link, ProtocolError,
    Response, Rgb, TransportError, MAX_PERCENT, SCENE_CHAIN_END, SCENE_DEFAULT, SCENE_OFF,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connected,
    /// A request is in flight
    Busy,
}

/// What the session knows about the lamp
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LampState {
    pub current_scene_id: Option<u8>,
    pub api_version: Option<(u8, u8)>,
}

/// Diagnostic snapshot for hosts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LampStatus {
    pub state: SessionState,
    pub current_scene_id: Option<u8>,
    pub api_version: Option<(u8, u8)>,
    pub cached_scenes: usize,
}

/// Uplight color as supplied by the caller
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Uplight {
    Rgb(Rgb),
    Hsb(Hsb),
}

impl Uplight {
    /// Wire representation
    #[must_use]
    pub fn to_rgb(self) -> Rgb {
        match self {
            Uplight::Rgb(rgb) => rgb,
            Uplight::Hsb(hsb) => color::hsb_to_rgb(hsb),
        }
    }
}

impl From<Rgb> for Uplight {
    fn from(rgb: Rgb) -> Self {
        Uplight::Rgb(rgb)
    }
}

impl From<Hsb> for Uplight {
    fn from(hsb: Hsb) -> Self {
        Uplight::Hsb(hsb)
    }
}

struct Inner<C> {
    link: Option<Link<C>>,
    state: LampState,
    scenes: SceneCache,
}

impl<C> Inner<C> {
    fn reset(&mut self) {
        self.link = None;
        self.state = LampState::default();
        self.scenes.clear();
    }
}

/// Marks the session busy for the lifetime of one request
struct BusyGuard<'a> {
    status: &'a watch::Sender<SessionState>,
}

impl<'a> BusyGuard<'a> {
    fn enter(status: &'a watch::Sender<SessionState>) -> Self {
        status.send_replace(SessionState::Busy);
        Self { status }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.status.send_if_modified(|state| {
            if *state == SessionState::Busy {
                *state = SessionState::Connected;
                true
            } else {
                false
            }
        });
    }
}

/// A session with one lamp.
///
/// Requests are serialized: concurrent callers queue on an internal lock, so
/// at most one request is ever in flight. The scene cache and lamp state are
/// only touched while holding that lock.
pub struct LampSession<C> {
    inner: Mutex<Inner<C>>,
    status: watch::Sender<SessionState>,
    config: SessionConfig,
}

impl<C: Characteristic> LampSession<C> {
    /// Create a disconnected session
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let (status, _) = watch::channel(SessionState::Disconnected);
        Self {
            inner: Mutex::new(Inner {
                link: None,
                state: LampState::default(),
                scenes: SceneCache::new(),
            }),
            status,
            config,
        }
    }

    /// Attach a connected characteristic. `notifications` carries every value
    /// the lamp notifies on the API endpoint; closing it signals transport loss.
    pub async fn connect(&self, characteristic: C, notifications: mpsc::Receiver<Vec<u8>>) {
        let mut inner = self.inner.lock().await;
        inner.reset();
        inner.link = Some(Link::new(
            characteristic,
            notifications,
            self.config.request_timeout,
            self.config.stale_grace,
        ));
        self.status.send_replace(SessionState::Connected);
        tracing::info!("Lamp session connected");
    }

    /// Drop the connection and forget all lamp state
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        inner.reset();
        self.status.send_replace(SessionState::Disconnected);
        tracing::info!("Lamp session disconnected");
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.status.borrow()
    }

    pub async fn lamp_state(&self) -> LampState {
        self.inner.lock().await.state.clone()
    }

    pub async fn status(&self) -> LampStatus {
        let inner = self.inner.lock().await;
        LampStatus {
            state: self.state(),
            current_scene_id: inner.state.current_scene_id,
            api_version: inner.state.api_version,
            cached_scenes: inner.scenes.len(),
        }
    }

    /// Whether the lamp shows anything but the off scene, if known
    pub async fn is_on(&self) -> Option<bool> {
        let inner = self.inner.lock().await;
        inner.state.current_scene_id.map(|id| id != SCENE_OFF)
    }

    /// Scenes cached so far
    pub async fn cached_scenes(&self) -> Vec<Scene> {
        self.inner.lock().await.scenes.all().cloned().collect()
    }

    /// Look up a cached scene by name
    pub async fn scene_by_name(&self, name: &str) -> Option<Scene> {
        self.inner.lock().await.scenes.by_name(name).cloned()
    }

    /// Ping the lamp, returning its API version and the round trip time
    pub async fn ping(&self) -> Result<((u8, u8), Duration), LampError> {
        let mut inner = self.inner.lock().await;
        let exchange = self.exchange(&mut inner, &Command::Ping).await?;
        match exchange.response {
            Response::PingAck { api_version } => {
                inner.state.api_version = Some(api_version);
                tracing::info!(
                    "Lamp API version {}.{} ({:?})",
                    api_version.0,
                    api_version.1,
                    exchange.round_trip
                );
                Ok((api_version, exchange.round_trip))
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Query one scene and cache it
    pub async fn query_scene(&self, id: u8) -> Result<Scene, LampError> {
        let mut inner = self.inner.lock().await;
        self.query_scene_locked(&mut inner, id).await
    }

    /// Walk the lamp's scene list from the first scene and cache all of it
    pub async fn refresh_scenes(&self) -> Result<Vec<Scene>, LampError> {
        let mut inner = self.inner.lock().await;
        let mut visited = BTreeSet::new();
        let mut next = Some(SCENE_OFF);

        while let Some(id) = next {
            if !visited.insert(id) {
                tracing::warn!("Scene list loops back to {}", id);
                break;
            }
            match self.query_scene_locked(&mut inner, id).await {
                Ok(scene) => next = scene.next_id,
                Err(LampError::Protocol(ProtocolError::DeviceError { code }))
                    if id != SCENE_OFF =>
                {
                    tracing::warn!("Failed to retrieve scene {} (code {:#04X})", id, code);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!("Cached {} scenes", inner.scenes.len());
        Ok(inner.scenes.all().cloned().collect())
    }

    /// Set uplight color and downlight temperature/brightness immediately.
    /// The uplight may be given as RGB or HSB.
    pub async fn set_light(
        &self,
        uplight: impl Into<Uplight>,
        downlight_temp_k: u16,
        downlight_brightness: u8,
    ) -> Result<(), LampError> {
        let command = Command::ImmediateLight {
            uplight: uplight.into().to_rgb(),
            downlight_temp_k,
            downlight_brightness,
        }
        .clamped();

        if let Err(e) = command.check_limits() {
            tracing::error!("Clamped light command still out of range: {}", e);
            return Err(e.into());
        }

        let mut inner = self.inner.lock().await;
        let exchange = self.exchange(&mut inner, &command).await?;
        expect_ack(&exchange)
    }

    /// Set absolute brightness in percent
    pub async fn set_brightness(&self, percent: u8) -> Result<(), LampError> {
        if percent > MAX_PERCENT {
            return Err(CallerError::BrightnessOutOfRange(percent).into());
        }
        let mut inner = self.inner.lock().await;
        let exchange = self
            .exchange(&mut inner, &Command::ModifyBrightness { percent })
            .await?;
        expect_ack(&exchange)
    }

    /// Change brightness by a signed percentage. The lamp clamps the result.
    pub async fn adjust_brightness(&self, delta_percent: i16) -> Result<(), LampError> {
        let delta_percent =
            i8::try_from(delta_percent).map_err(|_| CallerError::DeltaOutOfRange(delta_percent))?;
        let mut inner = self.inner.lock().await;
        let exchange = self
            .exchange(&mut inner, &Command::RelativeBrightness { delta_percent })
            .await?;
        expect_ack(&exchange)
    }

    /// Select a scene by id
    pub async fn select_scene(&self, id: u8) -> Result<(), LampError> {
        let mut inner = self.inner.lock().await;
        self.select_scene_locked(&mut inner, id).await
    }

    /// Select a cached scene by name
    pub async fn select_scene_by_name(&self, name: &str) -> Result<u8, LampError> {
        let mut inner = self.inner.lock().await;
        let id = inner
            .scenes
            .by_name(name)
            .map(|scene| scene.id)
            .ok_or_else(|| CallerError::UnknownScene(name.to_string()))?;
        self.select_scene_locked(&mut inner, id).await?;
        Ok(id)
    }

    /// Switch to the lamp's default scene
    pub async fn turn_on(&self) -> Result<(), LampError> {
        let mut inner = self.inner.lock().await;
        self.select_scene_locked(&mut inner, SCENE_DEFAULT).await?;
        // The lamp picks the actual scene; learn which one
        if let Err(e) = self.read_current_scene_locked(&mut inner).await {
            tracing::warn!("Failed to read scene after turning on: {}", e);
            inner.state.current_scene_id = None;
        }
        Ok(())
    }

    /// Switch to the off scene
    pub async fn turn_off(&self) -> Result<(), LampError> {
        self.select_scene(SCENE_OFF).await
    }

    /// Re-read the current scene from the lamp
    pub async fn refresh_current_scene(&self) -> Result<u8, LampError> {
        let mut inner = self.inner.lock().await;
        self.read_current_scene_locked(&mut inner).await
    }

    /// Step to the next brighter or dimmer scene.
    ///
    /// Scenes are queried lazily: the current scene first, then whichever
    /// scenes of the lamp's list are not cached yet. Once the list is cached
    /// stepping costs a single Select Scene request. If the lamp does not
    /// report the current scene's brightness, it steps by itself instead.
    pub async fn step_scene(&self, direction: Direction) -> Result<NavigationOutcome, LampError> {
        let mut inner = self.inner.lock().await;

        let current = match inner.state.current_scene_id {
            Some(id) => id,
            None => self.read_current_scene_locked(&mut inner).await?,
        };
        if !inner.scenes.contains(current) {
            self.query_scene_locked(&mut inner, current).await?;
        }

        let mut unavailable = BTreeSet::new();
        while let Some(id) = unexplored(&inner.scenes, &unavailable) {
            match self.query_scene_locked(&mut inner, id).await {
                Ok(_) => {}
                Err(LampError::Protocol(ProtocolError::DeviceError { code })) => {
                    tracing::debug!("Scene {} unavailable (code {:#04X})", id, code);
                    unavailable.insert(id);
                }
                Err(e) => return Err(e),
            }
        }

        let Some(outcome) = navigator::navigate(&inner.scenes, current, direction) else {
            tracing::info!("Brightness of scene {} unknown, lamp steps {:?}", current, direction);
            let landed = self.next_scene_on_device_locked(&mut inner, direction).await?;
            return Ok(match landed {
                Some(id) if id != current => NavigationOutcome::Changed(id),
                _ => NavigationOutcome::NoChange,
            });
        };
        match outcome {
            NavigationOutcome::Changed(id) => {
                tracing::info!("Stepping {:?} from scene {} to {}", direction, current, id);
                self.select_scene_locked(&mut inner, id).await?;
            }
            NavigationOutcome::NoChange => {
                tracing::info!("No scene {:?} than {}", direction, current);
            }
        }
        Ok(outcome)
    }

    /// Let the lamp step scenes itself, then learn where it went
    pub async fn device_next_scene(&self, direction: Direction) -> Result<Option<u8>, LampError> {
        let mut inner = self.inner.lock().await;
        self.next_scene_on_device_locked(&mut inner, direction).await
    }

    async fn next_scene_on_device_locked(
        &self,
        inner: &mut Inner<C>,
        direction: Direction,
    ) -> Result<Option<u8>, LampError> {
        let exchange = self
            .exchange(inner, &Command::NextScene { direction })
            .await?;
        expect_ack(&exchange)?;

        inner.state.current_scene_id = None;
        match self.read_current_scene_locked(inner).await {
            Ok(id) => Ok(Some(id)),
            Err(e) => {
                tracing::warn!("Failed to read scene after stepping: {}", e);
                Ok(None)
            }
        }
    }

    async fn query_scene_locked(&self, inner: &mut Inner<C>, id: u8) -> Result<Scene, LampError> {
        tracing::debug!("Querying scene {}", id);
        let exchange = self.exchange(inner, &Command::QueryScene { id }).await?;
        match exchange.response {
            Response::SceneInfo {
                id: reply_id,
                name,
                brightness,
                next_id,
            } => {
                if reply_id != id {
                    return Err(ProtocolError::DecodeFailure(DecodeError::Malformed(format!(
                        "asked for scene {id}, got {reply_id}"
                    )))
                    .into());
                }
                let scene = Scene {
                    id,
                    name,
                    brightness,
                    next_id,
                };
                inner.scenes.put(scene.clone());
                Ok(scene)
            }
            other => Err(unexpected(&other)),
        }
    }

    async fn select_scene_locked(&self, inner: &mut Inner<C>, id: u8) -> Result<(), LampError> {
        let exchange = self.exchange(inner, &Command::SelectScene { id }).await?;
        expect_ack(&exchange)?;
        inner.state.current_scene_id = Some(id);
        tracing::info!("Selected scene {}", id);
        Ok(())
    }

    async fn read_current_scene_locked(&self, inner: &mut Inner<C>) -> Result<u8, LampError> {
        let link = inner.link.as_ref().ok_or(TransportError::NotConnected)?;
        let result = {
            let _busy = BusyGuard::enter(&self.status);
            link.read_current_scene().await
        };
        let id = result?;
        inner.state.current_scene_id = Some(id);
        tracing::debug!("Current scene is {}", id);
        Ok(id)
    }

    /// Run one request on the link, tracking busy state and transport loss
    async fn exchange(
        &self,
        inner: &mut Inner<C>,
        command: &Command,
    ) -> Result<Exchange, LampError> {
        let link = inner.link.as_mut().ok_or(TransportError::NotConnected)?;
        let result = {
            let _busy = BusyGuard::enter(&self.status);
            link.request(command).await
        };

        if let Err(ProtocolError::Transport(TransportError::ConnectionLost)) = result {
            tracing::warn!("Lamp connection lost");
            inner.reset();
            self.status.send_replace(SessionState::Disconnected);
        }
        Ok(result?)
    }
}

/// Next scene id worth querying: the head of the list or a link out of the
/// cached part of it
fn unexplored(scenes: &SceneCache, unavailable: &BTreeSet<u8>) -> Option<u8> {
    std::iter::once(SCENE_OFF)
        .chain(scenes.all().filter_map(|scene| scene.next_id))
        .filter(|&id| id != SCENE_CHAIN_END)
        .find(|id| !scenes.contains(*id) && !unavailable.contains(id))
}

fn expect_ack(exchange: &Exchange) -> Result<(), LampError> {
    match &exchange.response {
        Response::Ack => Ok(()),
        other => Err(unexpected(other)),
    }
}

fn unexpected(response: &Response) -> LampError {
    ProtocolError::DecodeFailure(DecodeError::Malformed(format!(
        "unexpected reply {response:?}"
    )))
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    /// In-process lamp: parses requests and replies like the device would
    #[derive(Clone)]
    struct FakeLamp {
        scenes: Arc<BTreeMap<u8, (String, u8)>>,
        current: Arc<StdMutex<u8>>,
        writes: Arc<StdMutex<Vec<Vec<u8>>>>,
        tx: Arc<StdMutex<Option<mpsc::Sender<Vec<u8>>>>>,
        silent: Arc<AtomicBool>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        delay: Duration,
        reports_brightness: bool,
    }

    impl FakeLamp {
        fn new(scenes: &[(u8, &str, u8)], current: u8) -> (Self, mpsc::Receiver<Vec<u8>>) {
            let (tx, rx) = mpsc::channel(16);
            let scenes = scenes
                .iter()
                .map(|&(id, name, brightness)| (id, (name.to_string(), brightness)))
                .collect();
            let lamp = Self {
                scenes: Arc::new(scenes),
                current: Arc::new(StdMutex::new(current)),
                writes: Arc::new(StdMutex::new(Vec::new())),
                tx: Arc::new(StdMutex::new(Some(tx))),
                silent: Arc::new(AtomicBool::new(false)),
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_in_flight: Arc::new(AtomicUsize::new(0)),
                delay: Duration::ZERO,
                reports_brightness: true,
            };
            (lamp, rx)
        }

        fn writes(&self) -> Vec<Vec<u8>> {
            self.writes.lock().unwrap().clone()
        }

        fn commands(&self) -> Vec<Command> {
            self.writes()
                .iter()
                .map(|frame| Command::parse(frame).unwrap())
                .collect()
        }

        fn lose_connection(&self) {
            self.tx.lock().unwrap().take();
        }

        fn reply_to(&self, command: Command) -> Response {
            match command {
                Command::Ping => Response::PingAck {
                    api_version: (1, 3),
                },
                Command::QueryScene { id } => match self.scenes.get(&id) {
                    Some((name, brightness)) => Response::SceneInfo {
                        id,
                        name: name.clone(),
                        brightness: self.reports_brightness.then_some(*brightness),
                        next_id: self.scenes.keys().find(|&&next| next > id).copied(),
                    },
                    None => Response::Error { code: 0x81 },
                },
                Command::SelectScene { id } if id == SCENE_DEFAULT => {
                    *self.current.lock().unwrap() = 1;
                    Response::Ack
                }
                Command::SelectScene { id } if self.scenes.contains_key(&id) => {
                    *self.current.lock().unwrap() = id;
                    Response::Ack
                }
                Command::SelectScene { .. } => Response::Error { code: 0x82 },
                Command::NextScene { .. } => {
                    *self.current.lock().unwrap() = 3;
                    Response::Ack
                }
                _ => Response::Ack,
            }
        }
    }

    impl Characteristic for FakeLamp {
        async fn write(&self, frame: &[u8]) -> Result<(), TransportError> {
            self.writes.lock().unwrap().push(frame.to_vec());
            if self.silent.load(Ordering::SeqCst) {
                return Ok(());
            }
            let command =
                Command::parse(frame).map_err(|e| TransportError::WriteFailed(e.to_string()))?;
            let reply = self.reply_to(command).encode();
            let tx = self.tx.lock().unwrap().clone();
            if let Some(tx) = tx {
                let in_flight = self.in_flight.clone();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                let delay = self.delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    let _ = tx.send(reply).await;
                });
            }
            Ok(())
        }

        async fn read_current_scene(&self) -> Result<u8, TransportError> {
            Ok(*self.current.lock().unwrap())
        }
    }

    const SCENES: &[(u8, &str, u8)] = &[
        (0, "Off", 0),
        (1, "Cozy", 30),
        (2, "Reading", 50),
        (3, "Bright", 70),
    ];

    async fn connected(lamp: &FakeLamp, rx: mpsc::Receiver<Vec<u8>>) -> LampSession<FakeLamp> {
        let session = LampSession::new(SessionConfig::default());
        session.connect(lamp.clone(), rx).await;
        session
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_brightness_sends_nothing() {
        let (lamp, rx) = FakeLamp::new(SCENES, 2);
        let session = connected(&lamp, rx).await;

        let result = session.set_brightness(150).await;
        assert_eq!(
            result,
            Err(LampError::Caller(CallerError::BrightnessOutOfRange(150)))
        );
        assert!(lamp.writes().is_empty());

        session.set_brightness(40).await.unwrap();
        assert_eq!(lamp.writes(), vec![vec![0xA0, 0x01, 0x03, 40]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_timeout_returns_to_connected() {
        let (lamp, rx) = FakeLamp::new(SCENES, 2);
        lamp.silent.store(true, Ordering::SeqCst);
        let session = connected(&lamp, rx).await;

        let result = session.ping().await;
        assert_eq!(result, Err(LampError::Protocol(ProtocolError::Timeout)));
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_records_api_version() {
        let (lamp, rx) = FakeLamp::new(SCENES, 2);
        let session = connected(&lamp, rx).await;

        let (version, _round_trip) = session.ping().await.unwrap();
        assert_eq!(version, (1, 3));
        let status = session.status().await;
        assert_eq!(status.api_version, Some((1, 3)));
        assert_eq!(status.state, SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_scene_fills_cache() {
        let (lamp, rx) = FakeLamp::new(SCENES, 2);
        let session = connected(&lamp, rx).await;

        let scene = session.query_scene(2).await.unwrap();
        assert_eq!(scene.name, "Reading");
        assert_eq!(scene.next_id, Some(3));
        assert_eq!(session.cached_scenes().await, vec![scene]);
        assert_eq!(session.scene_by_name("reading").await.map(|s| s.id), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_scenes_walks_the_list() {
        let (lamp, rx) = FakeLamp::new(SCENES, 2);
        let session = connected(&lamp, rx).await;

        let scenes = session.refresh_scenes().await.unwrap();
        let ids: Vec<u8> = scenes.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert_eq!(lamp.writes().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_scene_updates_state_only_on_ack() {
        let (lamp, rx) = FakeLamp::new(SCENES, 2);
        let session = connected(&lamp, rx).await;

        session.select_scene(1).await.unwrap();
        assert_eq!(session.lamp_state().await.current_scene_id, Some(1));
        assert_eq!(session.is_on().await, Some(true));

        let result = session.select_scene(42).await;
        assert_eq!(
            result,
            Err(LampError::Protocol(ProtocolError::DeviceError { code: 0x82 }))
        );
        assert_eq!(session.lamp_state().await.current_scene_id, Some(1));

        session.turn_off().await.unwrap();
        assert_eq!(session.is_on().await, Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_on_learns_scene() {
        let (lamp, rx) = FakeLamp::new(SCENES, 0);
        let session = connected(&lamp, rx).await;

        session.turn_on().await.unwrap();
        assert_eq!(lamp.commands(), vec![Command::SelectScene { id: 0xFF }]);
        assert_eq!(session.lamp_state().await.current_scene_id, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_scene_by_name() {
        let (lamp, rx) = FakeLamp::new(SCENES, 0);
        let session = connected(&lamp, rx).await;

        assert_eq!(
            session.select_scene_by_name("Bright").await,
            Err(LampError::Caller(CallerError::UnknownScene("Bright".to_string())))
        );
        session.query_scene(3).await.unwrap();
        assert_eq!(session.select_scene_by_name("bright").await, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_step_explores_scene_list() {
        let (lamp, rx) = FakeLamp::new(SCENES, 2);
        let session = connected(&lamp, rx).await;

        let outcome = session.step_scene(Direction::Brighter).await.unwrap();
        assert_eq!(outcome, NavigationOutcome::Changed(3));
        // Current scene first, then the list from its head
        assert_eq!(
            lamp.commands(),
            vec![
                Command::QueryScene { id: 2 },
                Command::QueryScene { id: 0 },
                Command::QueryScene { id: 1 },
                Command::QueryScene { id: 3 },
                Command::SelectScene { id: 3 },
            ]
        );

        // Cache is complete now, stepping back needs one request
        let before = lamp.writes().len();
        let outcome = session.step_scene(Direction::Dimmer).await.unwrap();
        assert_eq!(outcome, NavigationOutcome::Changed(2));
        assert_eq!(lamp.writes().len(), before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_scene_at_extreme_is_no_change() {
        let (lamp, rx) = FakeLamp::new(SCENES, 3);
        let session = connected(&lamp, rx).await;

        let outcome = session.step_scene(Direction::Brighter).await.unwrap();
        assert_eq!(outcome, NavigationOutcome::NoChange);
        assert!(!lamp
            .commands()
            .iter()
            .any(|c| matches!(c, Command::SelectScene { .. })));
        assert_eq!(session.lamp_state().await.current_scene_id, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_without_brightness_lets_lamp_step() {
        let (mut lamp, rx) = FakeLamp::new(SCENES, 2);
        lamp.reports_brightness = false;
        let session = connected(&lamp, rx).await;

        let outcome = session.step_scene(Direction::Brighter).await.unwrap();
        assert_eq!(outcome, NavigationOutcome::Changed(3));
        assert_eq!(
            lamp.commands().last(),
            Some(&Command::NextScene {
                direction: Direction::Brighter
            })
        );
        assert_eq!(session.lamp_state().await.current_scene_id, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_are_serialized() {
        let (mut lamp, rx) = FakeLamp::new(SCENES, 2);
        lamp.delay = Duration::from_millis(50);
        let session = connected(&lamp, rx).await;

        let (ping, scene) = tokio::join!(session.ping(), session.query_scene(1));
        assert_eq!(ping.map(|(version, _)| version), Ok((1, 3)));
        assert_eq!(scene.map(|s| s.name), Ok("Cozy".to_string()));
        assert_eq!(lamp.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(
            lamp.commands(),
            vec![Command::Ping, Command::QueryScene { id: 1 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_next_scene() {
        let (lamp, rx) = FakeLamp::new(SCENES, 1);
        let session = connected(&lamp, rx).await;

        let landed = session.device_next_scene(Direction::Brighter).await.unwrap();
        assert_eq!(landed, Some(3));
        assert_eq!(lamp.writes(), vec![vec![0xA0, 0x02, 0x06, 0x01]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adjust_brightness() {
        let (lamp, rx) = FakeLamp::new(SCENES, 2);
        let session = connected(&lamp, rx).await;

        session.adjust_brightness(-10).await.unwrap();
        assert_eq!(lamp.writes(), vec![vec![0xA0, 0x02, 0x08, 0xF6]]);

        assert_eq!(
            session.adjust_brightness(300).await,
            Err(LampError::Caller(CallerError::DeltaOutOfRange(300)))
        );
        assert_eq!(lamp.writes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_light_from_hsb() {
        let (lamp, rx) = FakeLamp::new(SCENES, 2);
        let session = connected(&lamp, rx).await;

        session
            .set_light(Hsb::new(120.0, 100.0, 100.0), 5000, 60)
            .await
            .unwrap();
        assert_eq!(
            lamp.commands(),
            vec![Command::ImmediateLight {
                uplight: Rgb::new(0, 255, 0),
                downlight_temp_k: 4000,
                downlight_brightness: 60,
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_clears_state() {
        let (lamp, rx) = FakeLamp::new(SCENES, 2);
        let session = connected(&lamp, rx).await;
        session.query_scene(1).await.unwrap();
        session.select_scene(1).await.unwrap();

        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.lamp_state().await, LampState::default());
        assert!(session.cached_scenes().await.is_empty());
        assert_eq!(
            session.ping().await,
            Err(LampError::Transport(TransportError::NotConnected))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_loss_disconnects() {
        let (lamp, rx) = FakeLamp::new(SCENES, 2);
        let session = connected(&lamp, rx).await;
        session.query_scene(1).await.unwrap();

        lamp.lose_connection();
        assert_eq!(
            session.ping().await,
            Err(LampError::Transport(TransportError::ConnectionLost))
        );
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.cached_scenes().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_request_reply_is_discarded() {
        let (mut lamp, rx) = FakeLamp::new(SCENES, 2);
        lamp.delay = Duration::from_secs(2);
        let session = LampSession::new(
            SessionConfig::default()
                .with_request_timeout(Duration::from_secs(10))
                .with_stale_grace(Duration::from_secs(5)),
        );
        session.connect(lamp.clone(), rx).await;

        let abandoned = tokio::time::timeout(Duration::from_secs(1), session.ping()).await;
        assert!(abandoned.is_err());
        assert_eq!(session.state(), SessionState::Connected);

        let scene = session.query_scene(1).await.unwrap();
        assert_eq!(scene.id, 1);
        assert_eq!(session.lamp_state().await.api_version, None);
    }
}
