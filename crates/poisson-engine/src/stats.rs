//! Day-rolling counters behind /stats

use chrono::{Local, NaiveDate};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct DayStats {
    day: Mutex<NaiveDate>,
    sessions: AtomicU64,
    requests: AtomicU64,
    errors: AtomicU64,
    bytes: AtomicU64,
}

#[derive(Clone, Copy, Debug)]
pub struct DaySnapshot {
    pub sessions: u64,
    pub requests: u64,
    pub errors: u64,
    pub bytes: u64,
}

impl Default for DayStats {
    fn default() -> Self {
        Self::new()
    }
}

impl DayStats {
    pub fn new() -> Self {
        Self {
            day: Mutex::new(Local::now().date_naive()),
            sessions: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    fn roll(&self) {
        let today = Local::now().date_naive();
        let mut day = self.day.lock().expect("stats lock poisoned");
        if *day != today {
            *day = today;
            self.sessions.store(0, Ordering::Relaxed);
            self.requests.store(0, Ordering::Relaxed);
            self.errors.store(0, Ordering::Relaxed);
            self.bytes.store(0, Ordering::Relaxed);
        }
    }

    pub fn add_session(&self) {
        self.roll();
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_request(&self) {
        self.roll();
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_requests(&self, n: u64) {
        self.roll();
        self.requests.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_error(&self) {
        self.roll();
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, n: u64) {
        self.roll();
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DaySnapshot {
        self.roll();
        DaySnapshot {
            sessions: self.sessions.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}
