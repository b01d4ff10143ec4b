//! Execution data: probe arrays, the per-class registry and the exec stream format.

pub mod crc64;
pub mod execution_data;
pub mod io;
pub mod probes;
pub mod session;
pub mod store;

pub use crc64::class_id;
pub use execution_data::ExecutionData;
pub use io::{ExecDataReader, ExecDataVisitor, ExecDataWriter, ExecFileLoader};
pub use probes::ProbeArray;
pub use session::{SessionInfo, SessionInfoStore};
pub use store::ExecutionDataStore;
