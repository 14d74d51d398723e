//! Fixed-window per-key rate limiting for the profile ingest endpoint.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

pub struct RateGuard {
    max_per_minute: u32,
    windows: Mutex<HashMap<String, (i64, u32)>>,
}

impl RateGuard {
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Count one hit for `key`; false means the caller is over budget for
    /// the current minute.
    pub fn check(&self, key: &str) -> bool {
        let minute = Utc::now().timestamp() / 60;
        let mut windows = self.windows.lock().expect("rate guard poisoned");

        let entry = windows.entry(key.to_string()).or_insert((minute, 0));
        if entry.0 != minute {
            *entry = (minute, 0);
        }
        entry.1 += 1;

        // Opportunistic cleanup of dead windows.
        if windows.len() > 1024 {
            windows.retain(|_, (m, _)| *m == minute);
        }

        windows.get(key).map(|(_, n)| *n <= self.max_per_minute).unwrap_or(true)
    }
}
