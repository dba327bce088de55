use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

struct Base {
	instant: Instant,
	unix_ms: u128,
}

fn base() -> &'static Base {
	static BASE: OnceLock<Base> = OnceLock::new();
	BASE.get_or_init(|| {
		let now_sys = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.unwrap_or(Duration::from_secs(0))
			.as_millis();
		Base { instant: Instant::now(), unix_ms: now_sys }
	})
}

/// Current UNIX time in milliseconds from a cached base and Instant,
/// comparable with broker message timestamps
#[inline]
pub fn now_unix_ms() -> i64 {
	let b = base();
	let ms = b.unix_ms.saturating_add(b.instant.elapsed().as_millis());
	i64::try_from(ms).unwrap_or(i64::MAX)
}

/// Milliseconds elapsed since a broker timestamp; clock skew clamps to zero
pub fn latency_since_ms(broker_ts_ms: i64) -> u64 {
	now_unix_ms().saturating_sub(broker_ts_ms).max(0) as u64
}
