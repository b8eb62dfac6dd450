//! Intensity profiles — λ(t) = λ_base · diurnal(t) · drift(week) · jitter
//!
//! The effective rate is a pure function of wall-clock time (given the
//! jitter seed), which thinning requires: candidates drawn against λ_max
//! must see the same λ at their acceptance test as any other observer.

use chrono::{DateTime, Datelike, Local, Timelike};
use poisson_core::Intensity;

const GOLDEN: f64 = 0.618_033_988_749_894_8;
const MINUTES_PER_DAY: f64 = 1440.0;

/// Time-of-day rate multipliers, one node per hour, linearly interpolated.
#[derive(Clone, Debug)]
pub struct DiurnalCurve {
    hourly: [f64; 24],
}

impl DiurnalCurve {
    /// Default shape: quiet but nonzero 01:00-06:00, ramp 06:00-09:00,
    /// peak 09:00-22:00, taper 22:00-01:00.
    pub fn standard() -> Self {
        let mut hourly = [1.0; 24];
        hourly[0] = 0.35;
        for h in 1..6 {
            hourly[h] = 0.12;
        }
        hourly[6] = 0.30;
        hourly[7] = 0.55;
        hourly[8] = 0.80;
        hourly[22] = 0.70;
        hourly[23] = 0.50;
        Self { hourly }
    }

    /// Constant 1.0 — disables time-of-day shaping.
    pub fn flat() -> Self {
        Self { hourly: [1.0; 24] }
    }

    pub fn from_hourly(hourly: [f64; 24]) -> Self {
        Self { hourly }
    }

    /// Multiplier at `minutes` past midnight, wrapping at 24 h.
    pub fn factor(&self, minutes: f64) -> f64 {
        let m = minutes.rem_euclid(MINUTES_PER_DAY);
        let h = (m / 60.0).floor() as usize % 24;
        let next = (h + 1) % 24;
        let frac = (m - h as f64 * 60.0) / 60.0;
        self.hourly[h] * (1.0 - frac) + self.hourly[next] * frac
    }

    pub fn max_factor(&self) -> f64 {
        self.hourly.iter().cloned().fold(0.0, f64::max)
    }
}

/// A time-varying event rate, in events per second.
pub trait RateFn: Send + Sync {
    fn lambda(&self, t: DateTime<Local>) -> f64;

    /// Dominating rate over `[from, from + horizon_secs]`. Must satisfy
    /// `lambda_max >= lambda(t)` for every t in the window.
    fn lambda_max(&self, from: DateTime<Local>, horizon_secs: f64) -> f64 {
        let mut max = self.lambda(from);
        let steps = (horizon_secs / 60.0).ceil() as i64;
        for i in 1..=steps {
            let t = from + chrono::Duration::seconds(i * 60);
            max = max.max(self.lambda(t));
        }
        max
    }
}

#[derive(Clone, Debug)]
pub struct IntensityProfile {
    pub base_per_hour: f64,
    pub diurnal: DiurnalCurve,
    pub drift_enabled: bool,
    /// Per-minute multiplicative noise amplitude; 0 disables.
    pub jitter: f64,
    jitter_seed: u64,
}

impl IntensityProfile {
    pub fn new(intensity: Intensity, jitter_seed: u64) -> Self {
        Self {
            base_per_hour: intensity.lambda_base(),
            diurnal: DiurnalCurve::standard(),
            drift_enabled: true,
            jitter: 0.08,
            jitter_seed,
        }
    }

    /// Flat rate with diurnal, drift, and jitter disabled. Inter-arrival
    /// gaps under this profile are exactly exponential.
    pub fn constant(events_per_hour: f64) -> Self {
        Self {
            base_per_hour: events_per_hour,
            diurnal: DiurnalCurve::flat(),
            drift_enabled: false,
            jitter: 0.0,
            jitter_seed: 0,
        }
    }

    pub fn set_intensity(&mut self, intensity: Intensity) {
        self.base_per_hour = intensity.lambda_base();
    }

    /// Weekly phase drift in minutes, a deterministic function of the ISO
    /// week so schedules never repeat exactly but survive restarts.
    fn drift_minutes(&self, t: DateTime<Local>) -> f64 {
        if !self.drift_enabled {
            return 0.0;
        }
        let week = t.iso_week().year() as f64 * 53.0 + t.iso_week().week() as f64;
        45.0 * (std::f64::consts::TAU * (week * GOLDEN).fract()).sin()
    }

    fn jitter_factor(&self, t: DateTime<Local>) -> f64 {
        if self.jitter <= 0.0 {
            return 1.0;
        }
        let minute = t.timestamp().div_euclid(60) as u64;
        let noise = split_mix(self.jitter_seed ^ minute) as f64 / u64::MAX as f64;
        1.0 + self.jitter * (2.0 * noise - 1.0)
    }

    fn lambda_unjittered(&self, t: DateTime<Local>) -> f64 {
        let minutes = t.hour() as f64 * 60.0
            + t.minute() as f64
            + t.second() as f64 / 60.0
            + self.drift_minutes(t);
        self.base_per_hour / 3600.0 * self.diurnal.factor(minutes)
    }
}

impl RateFn for IntensityProfile {
    fn lambda(&self, t: DateTime<Local>) -> f64 {
        self.lambda_unjittered(t) * self.jitter_factor(t)
    }

    fn lambda_max(&self, from: DateTime<Local>, horizon_secs: f64) -> f64 {
        let mut max = self.lambda_unjittered(from);
        let steps = (horizon_secs / 60.0).ceil() as i64;
        for i in 1..=steps {
            let t = from + chrono::Duration::seconds(i * 60);
            max = max.max(self.lambda_unjittered(t));
        }
        max * (1.0 + self.jitter)
    }
}

fn split_mix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}
