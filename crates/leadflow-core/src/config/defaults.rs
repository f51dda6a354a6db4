//! Default value functions used by serde for config deserialization.

pub fn default_name() -> String {
    "leadflow".to_string()
}

pub fn default_data_dir() -> String {
    "~/.leadflow".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_true() -> bool {
    true
}

pub fn default_db_path() -> String {
    "~/.leadflow/data/leadflow.db".to_string()
}

pub fn default_max_connections() -> u32 {
    4
}

pub fn default_busy_timeout() -> u64 {
    5
}

pub fn default_poll_interval() -> u64 {
    60
}

pub fn default_batch_size() -> i64 {
    100
}

pub fn default_max_attempts() -> i64 {
    3
}

pub fn default_delivery_timeout() -> u64 {
    30
}

pub fn default_campaign() -> String {
    "no_response".to_string()
}

pub fn default_grace_minutes() -> i64 {
    15
}

pub fn default_attribution_window() -> i64 {
    24
}

pub fn default_transport_kind() -> String {
    "log".to_string()
}

pub fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

pub fn default_api_port() -> u16 {
    3900
}
