use snap_plugin_error::{PluginError, Result};
use snap_plugin_proto::v1;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Converts an instant to wire time, keeping nanosecond precision.
///
/// Instants before the epoch get a negative `seconds` and `nanos` in `[0, 1e9)`.
pub fn to_wire_time(instant: SystemTime) -> v1::Time {
    match instant.duration_since(UNIX_EPOCH) {
        Ok(since) => v1::Time {
            seconds: since.as_secs() as i64,
            nanos: since.subsec_nanos() as i32,
        },
        Err(err) => {
            let before = err.duration();
            let mut seconds = -(before.as_secs() as i64);
            let mut nanos = -(before.subsec_nanos() as i64);
            if nanos < 0 {
                seconds -= 1;
                nanos += NANOS_PER_SECOND;
            }
            v1::Time {
                seconds,
                nanos: nanos as i32,
            }
        }
    }
}

pub fn from_wire_time(time: &v1::Time) -> Result<SystemTime> {
    if !(0..NANOS_PER_SECOND).contains(&(time.nanos as i64)) {
        return Err(PluginError::MalformedMetric(format!(
            "time nanos {} outside [0, {NANOS_PER_SECOND})",
            time.nanos
        )));
    }

    let nanos = Duration::from_nanos(time.nanos as u64);
    let instant = if time.seconds >= 0 {
        UNIX_EPOCH.checked_add(Duration::from_secs(time.seconds as u64))
    } else {
        UNIX_EPOCH.checked_sub(Duration::from_secs(time.seconds.unsigned_abs()))
    }
    .and_then(|t| t.checked_add(nanos));

    instant.ok_or_else(|| {
        PluginError::MalformedMetric(format!("time {}s is not representable", time.seconds))
    })
}
