use time::OffsetDateTime;

/// Wall-clock seconds since the Unix epoch, used for `AccessCredential`
/// expiry math where a `time::OffsetDateTime` would be overkill to thread
/// through serde round-trips.
pub fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
