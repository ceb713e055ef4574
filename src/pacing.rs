use std::thread;
use std::time::Duration;

use log::debug;
use rand::Rng;

/// Jittered pause in front of each external search call, keeping bursts
/// inside the API's per-second allowance.
pub fn search_pause() {
    let mut rng = rand::thread_rng();
    let delay_ms = rng.gen_range(300..=700);
    thread::sleep(Duration::from_millis(delay_ms));
}

/// Backoff before the single retry of a transient search failure.
pub fn retry_backoff() {
    let mut rng = rand::thread_rng();
    let delay_ms = rng.gen_range(500..=1200);
    debug!("Retrying after {} ms backoff...", delay_ms);
    thread::sleep(Duration::from_millis(delay_ms));
}
