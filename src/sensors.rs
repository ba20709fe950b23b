use rand::Rng;
use std::time::Instant;
use tracing::warn;

use crate::calibration::{battery_voltage, normalize_reading};
use crate::error::SensorError;
use crate::types::{AmbientClimate, Battery, Light, SensorSnapshot, SoilMoisture, Temperature};

pub trait Sensor<T>: Send {
    fn begin(&mut self) -> bool {
        true
    }

    fn read(&mut self) -> Result<T, SensorError>;
}

/// One driver per reading in a [`SensorSnapshot`].
pub struct SensorBank {
    pub soil_moisture: Box<dyn Sensor<SoilMoisture>>,
    pub soil_temperature: Box<dyn Sensor<Temperature>>,
    pub ambient: Box<dyn Sensor<AmbientClimate>>,
    pub light: Box<dyn Sensor<Light>>,
    pub battery: Box<dyn Sensor<Battery>>,
}

fn read_or_default<T: Default>(sensor: &mut dyn Sensor<T>, name: &str, ok: &mut bool) -> T {
    match sensor.read() {
        Ok(v) => v,
        Err(e) => {
            warn!(sensor = name, error = %e, "Sensor read failed");
            *ok = false;
            T::default()
        }
    }
}

impl SensorBank {
    /// Lab drivers producing plausible, slowly varying readings.
    pub fn lab() -> Self {
        let start = Instant::now();
        Self {
            soil_moisture: Box::new(LabSoilMoisture::new(start, 3100, 1200)),
            soil_temperature: Box::new(LabWave::new(start, 18.0, 3.0, 5.0, |v| Temperature {
                temperature_c: v,
            })),
            ambient: Box::new(LabAmbient { start }),
            light: Box::new(LabWave::new(start, 200.0, 150.0, 6.0, |lux| Light { lux })),
            battery: Box::new(LabBattery { start }),
        }
    }

    pub fn begin(&mut self) -> bool {
        let results = [
            ("soil_moisture", self.soil_moisture.begin()),
            ("soil_temperature", self.soil_temperature.begin()),
            ("ambient", self.ambient.begin()),
            ("light", self.light.begin()),
            ("battery", self.battery.begin()),
        ];
        for (name, ok) in results {
            if !ok {
                warn!(sensor = name, "Sensor failed to start");
            }
        }
        results.iter().all(|(_, ok)| *ok)
    }

    /// Reads every sensor. A failed read leaves that field zeroed and
    /// clears `ok`; the other readings are still reported.
    pub fn sample(&mut self, timestamp_ms: u64) -> SensorSnapshot {
        let mut ok = true;
        SensorSnapshot {
            soil_moisture: read_or_default(self.soil_moisture.as_mut(), "soil_moisture", &mut ok),
            soil_temperature: read_or_default(
                self.soil_temperature.as_mut(),
                "soil_temperature",
                &mut ok,
            ),
            ambient: read_or_default(self.ambient.as_mut(), "ambient", &mut ok),
            light: read_or_default(self.light.as_mut(), "light", &mut ok),
            battery: read_or_default(self.battery.as_mut(), "battery", &mut ok),
            ok,
            timestamp_ms,
        }
    }
}

fn wave(start: Instant, period_secs: f32) -> f32 {
    (start.elapsed().as_secs_f32() / period_secs).sin()
}

fn jitter(scale: f32) -> f32 {
    rand::thread_rng().gen_range(-scale..=scale)
}

/// Analog probe between a dry and a wet reference count.
struct LabSoilMoisture {
    start: Instant,
    dry_ref: u16,
    wet_ref: u16,
}

impl LabSoilMoisture {
    fn new(start: Instant, dry_ref: u16, wet_ref: u16) -> Self {
        Self {
            start,
            dry_ref,
            wet_ref,
        }
    }
}

impl Sensor<SoilMoisture> for LabSoilMoisture {
    fn read(&mut self) -> Result<SoilMoisture, SensorError> {
        let (lo, hi) = (self.dry_ref.min(self.wet_ref), self.dry_ref.max(self.wet_ref));
        let swing = 0.5 + 0.4 * wave(self.start, 3.0);
        let raw = lo + (swing * f32::from(hi - lo)) as u16;
        Ok(SoilMoisture {
            raw,
            normalized: normalize_reading(raw, self.dry_ref, self.wet_ref),
        })
    }
}

struct LabWave<T> {
    start: Instant,
    base: f32,
    amplitude: f32,
    period_secs: f32,
    build: fn(f32) -> T,
}

impl<T> LabWave<T> {
    fn new(
        start: Instant,
        base: f32,
        amplitude: f32,
        period_secs: f32,
        build: fn(f32) -> T,
    ) -> Self {
        Self {
            start,
            base,
            amplitude,
            period_secs,
            build,
        }
    }
}

impl<T: Send> Sensor<T> for LabWave<T> {
    fn read(&mut self) -> Result<T, SensorError> {
        let v = self.base + self.amplitude * wave(self.start, self.period_secs) + jitter(0.05);
        Ok((self.build)(v))
    }
}

struct LabAmbient {
    start: Instant,
}

impl Sensor<AmbientClimate> for LabAmbient {
    fn read(&mut self) -> Result<AmbientClimate, SensorError> {
        let t = self.start.elapsed().as_secs_f32();
        let humidity = 50.0 + 5.0 * (t / 4.5).cos() + jitter(0.2);
        if !(0.0..=100.0).contains(&humidity) {
            return Err(SensorError::OutOfRange(humidity));
        }
        Ok(AmbientClimate {
            temperature_c: 22.0 + 1.5 * wave(self.start, 4.0) + jitter(0.05),
            humidity,
        })
    }
}

/// 12-bit ADC behind a 100k/100k divider on a 3.3 V reference.
struct LabBattery {
    start: Instant,
}

impl Sensor<Battery> for LabBattery {
    fn read(&mut self) -> Result<Battery, SensorError> {
        let volts = 3.7 + 0.3 * wave(self.start, 7.0);
        let raw = ((volts / 2.0) / 3.3 * 4095.0).round() as u16;
        Ok(Battery {
            voltage: battery_voltage(raw, 4095, 3.3, 100_000.0, 100_000.0),
        })
    }
}
