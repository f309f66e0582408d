//! Default configuration values
//!
//! These are embedded in the binary and used when no config file exists.

/// Default configuration as TOML (for reference/documentation)
pub const DEFAULT_CONFIG_TOML: &str = r##"
# surfacelink configuration

[transport]
host = "127.0.0.1"
port = 9877
connect_timeout_secs = 15
max_retries = 3
retry_delay_ms = 1000
max_retry_delay_ms = 30000
# 0 disables the idle timeout
idle_timeout_secs = 300
command_timeout_secs = 10
read_buffer_size = 8192
max_message_size = 16777216
monitor_interval_ms = 1000
# Peers to dial and serve, e.g. ["127.0.0.1:9900"]
outbound = []

[catalog]
# file = "/path/to/catalog.json"
"##;
