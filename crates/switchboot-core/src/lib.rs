pub mod csv_import;
pub mod error;
pub mod models;
pub mod policy;
pub mod preview;
pub mod serial;
pub mod vendor_error_patterns;
pub mod vendors;

// Re-export core types
pub use csv_import::{parse_devices_csv, CsvImportOutcome};
pub use error::CoreError;
pub use models::{
    BootstrapParams, CommandBlock, Device, DeviceUpdate, ErrorCode, EventLog, Job, LogLevel,
    NewDevice, NewEvent, NewJob, Run, RunDevice, RunDeviceStatus, RunStatus, ValidationError,
    VerifyReport, VerifyStatus, VerifyTask,
};
pub use policy::{normalize_mask, validate_device};
pub use preview::{render_command_stream, template_hash};
pub use serial::{
    default_prompt, discover_ports, ReadOutcome, SerialTransport, SerialTransportFactory,
    Transport, TransportFactory, MAX_PORTS,
};
pub use vendor_error_patterns::check_for_errors;
pub use vendors::{vendor_for, VendorAdapter};
