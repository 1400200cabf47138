mod atomic;
mod datetime;
mod hash;
mod units;

use std::time::SystemTime;

use rand::rngs::StdRng;
pub use rand::Rng;
use rand::SeedableRng;
pub use tokio::time::{timeout, Duration, Instant};

pub use self::atomic::*;
pub use self::datetime::*;
pub use self::hash::*;
pub use self::units::*;

pub fn rng_seed_now() -> StdRng {
    StdRng::seed_from_u64(
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64, // max 584 years
    )
}

/// Sleeps a random fraction of `timeout`, used to jitter retry loops so
/// competing nodes don't all wake up at once.
pub async fn sleep(timeout: Duration, rng: Option<&mut StdRng>) {
    let rand = rng.map_or_else(|| rng_seed_now().gen::<f64>(), |rng| rng.gen::<f64>());
    tokio::time::sleep(timeout.mul_f64(rand)).await;
}

pub async fn sleep_until(deadline: Instant, timeout: Duration, rng: Option<&mut StdRng>) {
    let rand = rng.map_or_else(|| rng_seed_now().gen::<f64>(), |rng| rng.gen::<f64>());
    let sleep_deadline = Instant::now() + timeout.mul_f64(rand);
    if sleep_deadline < deadline {
        tokio::time::sleep_until(sleep_deadline).await;
    }
}

/// Generates a random lowercase hex id of `bits` bits, prefixed with `prefix-`.
pub fn random_hex_id(prefix: &str, bits: usize) -> String {
    let bytes = bits.div_ceil(8);
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(buf.as_mut_slice());
    format!("{prefix}-{}", hex::encode(buf))
}
