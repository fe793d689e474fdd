pub mod cisco;
pub mod generic;

pub use cisco::CiscoVendor;
pub use generic::GenericVendor;

use crate::error::CoreError;
use crate::models::{BootstrapParams, CommandBlock, VerifyReport};

/// Capability of one switch vendor: render the bootstrap command blocks,
/// provide verify/save command sets, and judge the verification transcript.
pub trait VendorAdapter: Send + Sync {
    /// Stable identifier for this vendor.
    fn vendor_id(&self) -> &'static str;

    /// Confidence [0,1] that the transcript came from this vendor. Kept for
    /// future auto-detection; the declared vendor wins on the bootstrap path.
    fn detect(&self, transcript: &str) -> f32;

    /// Ordered command blocks implementing the bootstrap: enter configuration
    /// (critical), apply baseline (critical), exit and save (non-critical).
    fn bootstrap_commands(&self, params: &BootstrapParams)
        -> Result<Vec<CommandBlock>, CoreError>;

    fn verify_commands(&self, params: &BootstrapParams) -> Vec<String>;

    fn save_commands(&self, params: &BootstrapParams) -> Vec<String>;

    fn parse_verify(&self, transcript: &str, params: &BootstrapParams) -> VerifyReport;
}

static GENERIC: GenericVendor = GenericVendor;
static CISCO: CiscoVendor = CiscoVendor;

/// Closed registry from vendor id to adapter. Aliases resolve to their
/// canonical vendor; anything unknown falls back to `generic`.
pub fn vendor_for(vendor_id: &str) -> &'static dyn VendorAdapter {
    match vendor_id.to_ascii_lowercase().as_str() {
        "cisco" | "cisco_ios" => &CISCO,
        _ => &GENERIC,
    }
}

pub(crate) fn require<'a>(value: &'a str, field: &str) -> Result<&'a str, CoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(CoreError::template(format!(
            "missing required field: {}",
            field
        )))
    } else {
        Ok(trimmed)
    }
}
