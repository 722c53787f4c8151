const CHECK_INTERVAL: &str = "CHECK_INTERVAL";

pub fn check_interval_override() -> Option<u64> {
    std::env::var(CHECK_INTERVAL).ok().and_then(|v| v.parse().ok())
}

const FAILURE_THRESHOLD: &str = "FAILURE_THRESHOLD";

pub fn failure_threshold_override() -> Option<u32> {
    std::env::var(FAILURE_THRESHOLD)
        .ok()
        .and_then(|v| v.parse().ok())
}

const ROLLBACK_ENABLED: &str = "ROLLBACK_ENABLED";

pub fn rollback_enabled_override() -> Option<bool> {
    std::env::var(ROLLBACK_ENABLED).ok().and_then(|v| parse_bool(&v))
}

const PERFORMANCE_CHECK_ENABLED: &str = "PERFORMANCE_CHECK_ENABLED";

pub fn performance_check_enabled_override() -> Option<bool> {
    std::env::var(PERFORMANCE_CHECK_ENABLED)
        .ok()
        .and_then(|v| parse_bool(&v))
}

const ALERT_WEBHOOK: &str = "ALERT_WEBHOOK";

pub fn alert_webhook_override() -> Option<String> {
    std::env::var(ALERT_WEBHOOK).ok().filter(|v| !v.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
