use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand::Rng;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::hardware::Hardware;
use crate::params::Params;

pub const PUBLIC_KEY_FILE: &str = "id_rsa.pub";
pub const PRIVATE_KEY_FILE: &str = "id_rsa";

pub const LAST_PING_PARAM: &str = "LastAthenaPingTime";
pub const DONGLE_ID_PARAM: &str = "DongleId";

/// Retry counter after a confirmed success; keeps the first
/// post-disconnect backoff short without hammering the control plane.
pub const CONNECT_RETRY_BASELINE: u32 = 2;

const REGISTER_TIMEOUT: Duration = Duration::from_secs(15);
const TOKEN_TTL_SECS: u64 = 3600;

/// Upper bound of the jittered backoff window: min(128, 2^retries).
pub fn backoff_bound(retries: u32) -> u64 {
    1u64 << retries.min(7)
}

/// Full-jitter delay in whole seconds, uniform over [0, bound). This
/// exact shape bounds control-plane load during mass reconnection.
pub fn backoff_delay_secs(retries: u32) -> u64 {
    rand::thread_rng().gen_range(0..backoff_bound(retries))
}

/// Why one registration attempt failed. Every class is retried with
/// the same backoff; the distinction only drives logging.
#[derive(Debug)]
pub enum RegisterError {
    /// Not-entitled status from the control plane (402/403).
    Rejected(u16),
    Network(reqwest::Error),
    Protocol(String),
    /// Unexpected local fault, e.g. a missing credential file.
    Local(io::Error),
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(status) => write!(f, "registration rejected with status {status}"),
            Self::Network(err) => write!(f, "network error: {err}"),
            Self::Protocol(message) => write!(f, "protocol error: {message}"),
            Self::Local(err) => write!(f, "local error: {err}"),
        }
    }
}

impl std::error::Error for RegisterError {}

#[derive(Serialize)]
struct RegisterClaims {
    register: bool,
    exp: u64,
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// RS256 token over the device private key, valid for one hour.
pub fn sign_register_token(private_key_pem: &[u8]) -> io::Result<String> {
    let key = EncodingKey::from_rsa_pem(private_key_pem).map_err(io::Error::other)?;
    let claims = RegisterClaims {
        register: true,
        exp: unix_secs() + TOKEN_TTL_SECS,
    };
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key).map_err(io::Error::other)
}

/// Performs the registration handshake against the control plane.
pub struct Registrar {
    client: reqwest::Client,
    api_host: String,
    params: Params,
    persist_dir: PathBuf,
    hardware: Arc<dyn Hardware>,
}

impl Registrar {
    pub fn new(
        client: reqwest::Client,
        api_host: impl Into<String>,
        params: Params,
        persist_dir: impl Into<PathBuf>,
        hardware: Arc<dyn Hardware>,
    ) -> Self {
        Self {
            client,
            api_host: api_host.into(),
            params,
            persist_dir: persist_dir.into(),
            hardware,
        }
    }

    /// One timed registration attempt. Success persists the contact
    /// timestamp and dongle id; any failure deletes the timestamp so
    /// its absence doubles as the connectivity health signal.
    pub async fn register_once(&self) -> Result<String, RegisterError> {
        let outcome = self.attempt().await;
        if outcome.is_err() {
            if let Err(err) = self.params.delete(LAST_PING_PARAM) {
                log::warn!("register: clearing {LAST_PING_PARAM} failed: {err}");
            }
        }
        outcome
    }

    async fn attempt(&self) -> Result<String, RegisterError> {
        let serial = self.hardware.serial().map_err(RegisterError::Local)?;
        let imei = self.hardware.imei(0).map_err(RegisterError::Local)?;
        let imei2 = self.hardware.imei(1).map_err(RegisterError::Local)?;
        let public_key = fs::read_to_string(self.persist_dir.join(PUBLIC_KEY_FILE))
            .map_err(RegisterError::Local)?;
        let private_key =
            fs::read(self.persist_dir.join(PRIVATE_KEY_FILE)).map_err(RegisterError::Local)?;
        let register_token = sign_register_token(&private_key).map_err(RegisterError::Local)?;

        let url = format!("{}/v2/pilotauth/", self.api_host.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .query(&[
                ("imei", imei.as_str()),
                ("imei2", imei2.as_str()),
                ("serial", serial.as_str()),
                ("public_key", public_key.as_str()),
                ("register_token", register_token.as_str()),
            ])
            .timeout(REGISTER_TIMEOUT)
            .send()
            .await
            .map_err(RegisterError::Network)?;

        let status = response.status().as_u16();
        if status == 402 || status == 403 {
            return Err(RegisterError::Rejected(status));
        }
        if !response.status().is_success() {
            return Err(RegisterError::Protocol(format!(
                "unexpected status {status}"
            )));
        }

        let body: JsonValue = response.json().await.map_err(RegisterError::Network)?;
        let dongle_id = body
            .get("dongle_id")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| RegisterError::Protocol("response missing dongle_id".to_string()))?
            .to_string();

        let now_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        self.params
            .put(LAST_PING_PARAM, &now_ns.to_string())
            .map_err(RegisterError::Local)?;
        self.params
            .put(DONGLE_ID_PARAM, &dongle_id)
            .map_err(RegisterError::Local)?;
        Ok(dongle_id)
    }
}
