//! BLE link to the lamp
//!
//! Scans for the lamp's GATT service, connects, and exposes the API endpoint
//! and Current Scene characteristics to the session.

use crate::config::ServerConfig;
use anyhow::{anyhow, Context};
use btleplug::api::{
    Central, CentralEvent, Characteristic as GattCharacteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use luvo_core::{Characteristic, LampSession};
use luvo_protocol::{TransportError, API_ENDPOINT_UUID, CURRENT_SCENE_UUID, SERVICE_UUID};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Notification buffer between the BLE stack and the session
const NOTIFICATION_BUFFER: usize = 16;

/// The lamp's characteristics on a connected peripheral
pub struct BleLamp {
    peripheral: Peripheral,
    api: GattCharacteristic,
    current_scene: GattCharacteristic,
}

impl Characteristic for BleLamp {
    async fn write(&self, frame: &[u8]) -> Result<(), TransportError> {
        self.peripheral
            .write(&self.api, frame, WriteType::WithResponse)
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    async fn read_current_scene(&self) -> Result<u8, TransportError> {
        let data = self
            .peripheral
            .read(&self.current_scene)
            .await
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;
        data.first()
            .copied()
            .ok_or_else(|| TransportError::ReadFailed("empty current scene value".to_string()))
    }
}

fn parse_uuid(s: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("invalid UUID {s}"))
}

/// Whether a peripheral matches the configured target. Without a target any
/// lamp matches.
fn matches_target(name: Option<&str>, address: &str, target: Option<&str>) -> bool {
    match target {
        Some(t) => {
            address.eq_ignore_ascii_case(t) || name.is_some_and(|n| n.contains(t))
        }
        None => true,
    }
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> anyhow::Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No Bluetooth adapter found"))
}

/// Scan for the lamp and find its peripheral
async fn find_lamp(adapter: &Adapter, config: &ServerConfig) -> anyhow::Result<Peripheral> {
    let service = parse_uuid(SERVICE_UUID)?;

    adapter
        .start_scan(ScanFilter {
            services: vec![service],
        })
        .await?;
    tokio::time::sleep(config.scan_duration).await;
    let peripherals = adapter.peripherals().await?;
    adapter.stop_scan().await?;

    for peripheral in peripherals {
        let Some(props) = peripheral.properties().await? else {
            continue;
        };
        let address = peripheral.address().to_string();
        if !props.services.contains(&service) {
            continue;
        }
        if matches_target(props.local_name.as_deref(), &address, config.address.as_deref()) {
            tracing::info!(
                "Found lamp {} ({})",
                address,
                props.local_name.as_deref().unwrap_or("unnamed")
            );
            return Ok(peripheral);
        }
    }

    Err(anyhow!(
        "No lamp found{}",
        config
            .address
            .as_ref()
            .map(|a| format!(" matching {a}"))
            .unwrap_or_default()
    ))
}

/// Run `release` if `result` failed, then hand the result back
async fn release_on_error<T, F, Fut>(result: anyhow::Result<T>, release: F) -> anyhow::Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    if result.is_err() {
        release().await;
    }
    result
}

/// Drop the GATT link so the lamp advertises again
async fn release(peripheral: &Peripheral) {
    if let Err(e) = peripheral.disconnect().await {
        tracing::debug!("Disconnecting lamp failed: {}", e);
    }
}

/// Connect to the lamp and start forwarding API endpoint notifications
pub async fn connect(
    adapter: &Adapter,
    config: &ServerConfig,
) -> anyhow::Result<(BleLamp, mpsc::Receiver<Vec<u8>>)> {
    let peripheral = find_lamp(adapter, config).await?;
    peripheral.connect().await.context("connecting to lamp")?;
    let attached = attach(&peripheral).await;
    release_on_error(attached, || release(&peripheral)).await
}

/// Locate the lamp's characteristics on a connected peripheral and subscribe
async fn attach(peripheral: &Peripheral) -> anyhow::Result<(BleLamp, mpsc::Receiver<Vec<u8>>)> {
    peripheral
        .discover_services()
        .await
        .context("discovering services")?;

    let api_uuid = parse_uuid(API_ENDPOINT_UUID)?;
    let scene_uuid = parse_uuid(CURRENT_SCENE_UUID)?;
    let characteristics = peripheral.characteristics();
    let find = |uuid: Uuid| {
        characteristics
            .iter()
            .find(|c| c.uuid == uuid)
            .cloned()
            .ok_or_else(|| anyhow!("characteristic {uuid} not found"))
    };
    let api = find(api_uuid)?;
    let current_scene = find(scene_uuid)?;

    peripheral
        .subscribe(&api)
        .await
        .context("subscribing to API endpoint")?;
    let mut notifications = peripheral.notifications().await?;

    let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
    tokio::spawn(async move {
        while let Some(notification) = notifications.next().await {
            if notification.uuid != api_uuid {
                continue;
            }
            if tx.send(notification.value).await.is_err() {
                break;
            }
        }
        tracing::debug!("Notification stream ended");
    });

    Ok((
        BleLamp {
            peripheral: peripheral.clone(),
            api,
            current_scene,
        },
        rx,
    ))
}

/// Keep the session connected: connect, prime its state, wait for the
/// peripheral to drop, repeat.
pub async fn supervise(session: Arc<LampSession<BleLamp>>, config: ServerConfig) {
    loop {
        if let Err(e) = run_connection(&session, &config).await {
            tracing::warn!("Lamp connection failed: {:#}", e);
        }
        session.disconnect().await;
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

async fn run_connection(
    session: &LampSession<BleLamp>,
    config: &ServerConfig,
) -> anyhow::Result<()> {
    let adapter = get_adapter().await?;
    let mut events = adapter.events().await?;

    let (lamp, notifications) = connect(&adapter, config).await?;
    let peripheral = lamp.peripheral.clone();
    session.connect(lamp, notifications).await;

    let result = serve(session, &mut events, &peripheral).await;
    session.disconnect().await;
    release(&peripheral).await;
    result
}

/// Prime the session, then wait for the lamp to go away
async fn serve(
    session: &LampSession<BleLamp>,
    events: &mut (impl futures::Stream<Item = CentralEvent> + Unpin),
    peripheral: &Peripheral,
) -> anyhow::Result<()> {
    let peripheral_id = peripheral.id();

    match session.ping().await {
        Ok((version, _)) => tracing::info!("Lamp API version {}.{}", version.0, version.1),
        Err(e) => tracing::warn!("Failed to ping lamp: {}", e),
    }
    match session.refresh_current_scene().await {
        Ok(id) => tracing::info!("Lamp shows scene {}", id),
        Err(e) => tracing::warn!("Failed to read current scene: {}", e),
    }

    while let Some(event) = events.next().await {
        if let CentralEvent::DeviceDisconnected(id) = event {
            if id == peripheral_id {
                tracing::info!("Lamp disconnected");
                return Ok(());
            }
        }
    }
    Err(anyhow!("adapter event stream ended"))
}
