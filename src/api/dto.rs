use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::health::DeviceHealth;
use crate::reading::Reading;

#[derive(Debug, Serialize, ToSchema)]
pub struct ReadingDto {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    /// Volts
    pub voltage: Option<f64>,
    /// Amperes
    pub current: Option<f64>,
    /// Watts
    pub power: Option<f64>,
    /// Watt-hours
    pub energy: Option<f64>,
    pub pir_status: bool,
    pub pump_status: bool,
    pub auto_mode: bool,
}

impl From<Reading> for ReadingDto {
    fn from(r: Reading) -> Self {
        Self {
            device_id: r.device_id,
            timestamp: r.timestamp,
            voltage: r.voltage,
            current: r.current,
            power: r.power,
            energy: r.energy,
            pir_status: r.pir_status,
            pump_status: r.pump_status,
            auto_mode: r.auto_mode,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeviceStatusDto {
    pub device_id: String,
    pub health: DeviceHealth,
    /// Last known reading; kept available even when the device is offline.
    pub latest: Option<ReadingDto>,
}
