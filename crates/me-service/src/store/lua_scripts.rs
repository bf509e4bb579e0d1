//! Lua scripts for multi-key Redis store operations.
//!
//! Each script runs atomically, so an event and its receipt index entry (or
//! an event and its outcome) are never observed half-written or
//! half-deleted.

/// Insert an event if absent and index it by receipt time.
///
/// Arguments:
/// - KEYS[1]: Event key (e.g., `me:event:{id}`)
/// - KEYS[2]: Receipt index (ZSET, `me:events:by_receipt`)
/// - ARGV[1]: Event JSON
/// - ARGV[2]: Receipt time (epoch millis, ZSET score)
/// - ARGV[3]: Event id (ZSET member)
///
/// Returns:
/// - 1: Inserted
/// - 0: Already present (nothing written)
pub const UPSERT_EVENT: &str = r#"
if redis.call('SET', KEYS[1], ARGV[1], 'NX') then
    redis.call('ZADD', KEYS[2], ARGV[2], ARGV[3])
    return 1
end
return 0
"#;

/// Record a processing attempt.
///
/// Arguments:
/// - KEYS[1]: Outcome key (HASH, `me:outcome:{id}`)
/// - ARGV[1]: Processed flag ("1" or "0")
/// - ARGV[2]: Attempt time (epoch millis)
///
/// Returns the retry count after this attempt.
pub const RECORD_OUTCOME: &str = r#"
local retry_count = tonumber(redis.call('HGET', KEYS[1], 'retry_count')) or 0

if ARGV[1] == '0' then
    retry_count = retry_count + 1
end

redis.call('HSET', KEYS[1], 'processed', ARGV[1], 'retry_count', retry_count, 'processed_at', ARGV[2])
return retry_count
"#;

/// Delete events received before a cutoff, with their outcomes.
///
/// Arguments:
/// - KEYS[1]: Receipt index (ZSET, `me:events:by_receipt`)
/// - ARGV[1]: Cutoff (epoch millis, exclusive)
/// - ARGV[2]: Key prefix including trailing colon (e.g., `me:`)
///
/// Returns the number of events deleted.
pub const PURGE_EVENTS_BEFORE: &str = r#"
local bound = '(' .. ARGV[1]
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', bound)

for _, id in ipairs(ids) do
    redis.call('DEL', ARGV[2] .. 'event:' .. id, ARGV[2] .. 'outcome:' .. id)
end

redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', bound)
return #ids
"#;
