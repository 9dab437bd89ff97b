pub mod hardware;
pub mod logs;
pub mod params;
pub mod queues;
pub mod registration;
pub mod rpc;
pub mod telemetry;
pub mod uploads;

pub use crate::registration::{backoff_bound, backoff_delay_secs, Registrar};
pub use crate::rpc::{Dispatcher, RpcError, RpcRequest, RpcResponse};
pub use crate::uploads::{UploadItem, UploadQueue};
