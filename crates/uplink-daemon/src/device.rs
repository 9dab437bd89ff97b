use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value as JsonValue;

use uplink::hardware::Hardware;

/// Runtime files the connectivity manager keeps current.
const MODEM_DIR: &str = "/run/modem";

/// Hardware adapter backed by the identity files the provisioning
/// process leaves under the persist dir, the modem state files under
/// `/run/modem`, plus the system reboot command. Everything else lives
/// behind the `Hardware` trait so tests can swap it out.
pub struct DeviceInterface {
    serial_path: PathBuf,
    imei_paths: [PathBuf; 2],
    sim_info_path: PathBuf,
    network_type_path: PathBuf,
}

impl DeviceInterface {
    pub fn new(persist_dir: &Path) -> Self {
        Self {
            serial_path: persist_dir.join("serial"),
            imei_paths: [persist_dir.join("imei0"), persist_dir.join("imei1")],
            sim_info_path: Path::new(MODEM_DIR).join("sim.json"),
            network_type_path: Path::new(MODEM_DIR).join("network_type"),
        }
    }
}

fn read_trimmed(path: &Path) -> io::Result<String> {
    Ok(fs::read_to_string(path)?.trim().to_string())
}

impl Hardware for DeviceInterface {
    fn serial(&self) -> io::Result<String> {
        read_trimmed(&self.serial_path)
    }

    fn imei(&self, slot: usize) -> io::Result<String> {
        let path = self.imei_paths.get(slot).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("no sim slot {slot}"))
        })?;
        read_trimmed(path)
    }

    fn sim_info(&self) -> io::Result<JsonValue> {
        let raw = fs::read_to_string(&self.sim_info_path)?;
        serde_json::from_str(&raw).map_err(io::Error::other)
    }

    fn network_type(&self) -> io::Result<i64> {
        read_trimmed(&self.network_type_path)?
            .parse()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    fn reboot(&self) -> io::Result<()> {
        let status = Command::new("reboot").status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("reboot exited with {status}")))
        }
    }
}
