use super::*;

#[test]
fn env_parse_missing_returns_default() {
    let val: u64 = env_parse("__BOARDSYNC_TEST_MISSING__", 42);
    assert_eq!(val, 42);
}

#[test]
fn env_parse_present_valid() {
    unsafe { std::env::set_var("__BOARDSYNC_TEST_VALID__", " 99 ") };
    let val: u64 = env_parse("__BOARDSYNC_TEST_VALID__", 0);
    assert_eq!(val, 99);
    unsafe { std::env::remove_var("__BOARDSYNC_TEST_VALID__") };
}

#[test]
fn env_parse_present_invalid_returns_default() {
    unsafe { std::env::set_var("__BOARDSYNC_TEST_INVALID__", "soon") };
    let val: u64 = env_parse("__BOARDSYNC_TEST_INVALID__", 7);
    assert_eq!(val, 7);
    unsafe { std::env::remove_var("__BOARDSYNC_TEST_INVALID__") };
}

#[test]
fn default_matches_constants() {
    let config = SyncConfig::default();
    assert_eq!(config.write_debounce, Duration::from_millis(DEFAULT_WRITE_DEBOUNCE_MS));
    assert_eq!(config.write_retry, Duration::from_millis(DEFAULT_WRITE_RETRY_MS));
    assert_eq!(config.command_queue_capacity, DEFAULT_COMMAND_QUEUE_CAPACITY);
}

#[test]
fn from_env_reads_overrides() {
    unsafe {
        std::env::set_var("BOARDSYNC_WRITE_DEBOUNCE_MS", "50");
        std::env::set_var("BOARDSYNC_WRITE_RETRY_MS", "75");
        std::env::set_var("BOARDSYNC_COMMAND_QUEUE_CAPACITY", "0");
    }
    let config = SyncConfig::from_env();
    assert_eq!(config.write_debounce, Duration::from_millis(50));
    assert_eq!(config.write_retry, Duration::from_millis(75));
    assert_eq!(config.command_queue_capacity, 1);
    unsafe {
        std::env::remove_var("BOARDSYNC_WRITE_DEBOUNCE_MS");
        std::env::remove_var("BOARDSYNC_WRITE_RETRY_MS");
        std::env::remove_var("BOARDSYNC_COMMAND_QUEUE_CAPACITY");
    }
}
