use std::io;

use serde_json::Value as JsonValue;

/// Hardware primitives the agent invokes but does not implement.
pub trait Hardware: Send + Sync {
    fn serial(&self) -> io::Result<String>;

    /// IMEI for the given SIM slot (0 or 1).
    fn imei(&self, slot: usize) -> io::Result<String>;

    /// Modem and SIM details as reported by the connectivity stack.
    fn sim_info(&self) -> io::Result<JsonValue>;

    /// Active radio technology as a numeric code.
    fn network_type(&self) -> io::Result<i64>;

    fn reboot(&self) -> io::Result<()>;
}
