/// Atomic all-or-nothing decrement across several counters.
///
/// `KEYS[i]` is a counter and `ARGV[i]` the quantity to take from it.
/// Returns `0` without touching any key if a counter is missing, not a
/// number, or lower than its quantity. Otherwise decrements every counter
/// and returns `1`.
pub const RESERVE_SCRIPT: &str = r#"
for i = 1, #KEYS do
  local current = tonumber(redis.call("GET", KEYS[i]))
  local quantity = tonumber(ARGV[i])
  if not current or current < quantity then
    return 0
  end
end
for i = 1, #KEYS do
  redis.call("DECRBY", KEYS[i], ARGV[i])
end
return 1
"#;

/// Script result meaning every counter was decremented.
pub const RESERVED: i64 = 1;

/// Script result meaning nothing was changed.
pub const INSUFFICIENT: i64 = 0;

/// [`RESERVE_SCRIPT`] guarded by a marker key.
///
/// `KEYS[1]` is the marker, `KEYS[i + 1]` a counter and `ARGV[i]` its
/// quantity. Returns `2` without touching any key if the marker exists,
/// `0` if a counter cannot cover its quantity, and `1` after decrementing
/// every counter and setting the marker.
pub const RESERVE_ONCE_SCRIPT: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 1 then
  return 2
end
for i = 2, #KEYS do
  local current = tonumber(redis.call("GET", KEYS[i]))
  local quantity = tonumber(ARGV[i - 1])
  if not current or current < quantity then
    return 0
  end
end
for i = 2, #KEYS do
  redis.call("DECRBY", KEYS[i], ARGV[i - 1])
end
redis.call("SET", KEYS[1], "1")
return 1
"#;

/// Gives back what [`RESERVE_ONCE_SCRIPT`] took.
///
/// Same key layout. Returns `0` if the marker is absent. Otherwise deletes
/// the marker, increments every counter and returns `1`.
pub const RELEASE_SCRIPT: &str = r#"
if redis.call("DEL", KEYS[1]) == 0 then
  return 0
end
for i = 2, #KEYS do
  redis.call("INCRBY", KEYS[i], ARGV[i - 1])
end
return 1
"#;

/// Script result meaning the marker was already set.
pub const ALREADY_RESERVED: i64 = 2;

/// Release result meaning the counters were incremented.
pub const RELEASED: i64 = 1;

/// Release result meaning there was nothing to release.
pub const NOT_RESERVED: i64 = 0;
