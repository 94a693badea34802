use once_cell::sync::Lazy;
use std::sync::{Mutex, MutexGuard};

use crate::enforcement::decision::Outcome;
use crate::ledger::{DeviceCounts, DeviceLedger, DeviceRecord, DeviceSeed};
use crate::observability::{AlertSink, SecurityAlert};
use crate::signals::fingerprint::Fingerprint;
use crate::signals::observation::{ClientAttributes, RequestObservation, ScreenGeometry};
use crate::store::StoreError;

pub(crate) const CHROME_WINDOWS: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub(crate) fn lock_env() -> MutexGuard<'static, ()> {
    ENV_MUTEX
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Every optional attribute populated with plausible desktop values.
pub(crate) fn desktop_attributes() -> ClientAttributes {
    ClientAttributes {
        timezone: Some("Europe/London".to_string()),
        screen: Some(ScreenGeometry {
            width: 1920,
            height: 1080,
            color_depth: Some(24),
        }),
        platform: Some("Win32".to_string()),
        plugins: Some(vec!["PDF Viewer".to_string(), "Chrome PDF Viewer".to_string()]),
        fonts: Some(
            ["Arial", "Calibri", "Segoe UI", "Times New Roman"]
                .iter()
                .map(|f| f.to_string())
                .collect(),
        ),
        canvas_signature: Some("c4f1a9".to_string()),
        webgl_signature: Some("ANGLE (NVIDIA GeForce RTX 3060)".to_string()),
        audio_signature: Some("124.0434".to_string()),
        touch_support: Some(false),
        hardware_concurrency: Some(8),
        device_memory: Some(8.0),
        connection_type: Some("4g".to_string()),
        cookies_enabled: Some(true),
        do_not_track: Some(false),
    }
}

pub(crate) fn desktop_observation(origin: &str) -> RequestObservation {
    RequestObservation::new(origin, Some(CHROME_WINDOWS)).with_attributes(desktop_attributes())
}

#[derive(Default)]
pub(crate) struct RecordingAlertSink {
    alerts: Mutex<Vec<SecurityAlert>>,
}

impl RecordingAlertSink {
    pub(crate) fn alerts(&self) -> Vec<SecurityAlert> {
        self.alerts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn outcomes(&self) -> Vec<Outcome> {
        self.alerts().iter().map(|alert| alert.outcome).collect()
    }
}

impl AlertSink for RecordingAlertSink {
    fn emit(&self, alert: &SecurityAlert) {
        self.alerts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(alert.clone());
    }
}

/// Sink that faults on every alert, standing in for a code defect.
pub(crate) struct PanickingAlertSink;

impl AlertSink for PanickingAlertSink {
    fn emit(&self, _alert: &SecurityAlert) {
        panic!("alert sink failure");
    }
}

/// Ledger whose record updates fault, standing in for a defect inside the
/// scoring pipeline.
pub(crate) struct PanickingLedger;

impl DeviceLedger for PanickingLedger {
    fn get(&self, _fingerprint: &Fingerprint) -> Result<Option<DeviceRecord>, StoreError> {
        Ok(None)
    }

    fn put(&self, _fingerprint: &Fingerprint, _record: DeviceRecord) -> Result<(), StoreError> {
        Ok(())
    }

    fn get_or_create(
        &self,
        fingerprint: &Fingerprint,
        seed: &DeviceSeed,
    ) -> Result<DeviceRecord, StoreError> {
        Ok(DeviceRecord::new(fingerprint.clone(), seed))
    }

    fn update<F>(
        &self,
        _fingerprint: &Fingerprint,
        _seed: &DeviceSeed,
        _mutate: F,
    ) -> Result<DeviceRecord, StoreError>
    where
        F: FnMut(&mut DeviceRecord),
    {
        panic!("record update failure");
    }

    fn update_existing<F>(
        &self,
        _fingerprint: &Fingerprint,
        _mutate: F,
    ) -> Result<Option<DeviceRecord>, StoreError>
    where
        F: FnMut(&mut DeviceRecord),
    {
        Ok(None)
    }

    fn index_origin(&self, _origin: &str, _fingerprint: &Fingerprint) -> Result<(), StoreError> {
        Ok(())
    }

    fn fingerprints_for_origin(&self, _origin: &str) -> Result<Vec<Fingerprint>, StoreError> {
        Ok(Vec::new())
    }

    fn counts(&self) -> Result<DeviceCounts, StoreError> {
        Ok(DeviceCounts::default())
    }
}
