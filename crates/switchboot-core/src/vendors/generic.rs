use super::{require, VendorAdapter};
use crate::error::CoreError;
use crate::models::{BootstrapParams, CommandBlock, VerifyReport};
use crate::policy::normalize_mask;

/// Lowest-common-denominator adapter for switches without a dedicated
/// implementation. One critical block, prompt-agnostic verification.
pub struct GenericVendor;

impl VendorAdapter for GenericVendor {
    fn vendor_id(&self) -> &'static str {
        "generic"
    }

    fn detect(&self, _transcript: &str) -> f32 {
        // Matches anything, barely.
        0.1
    }

    fn bootstrap_commands(
        &self,
        params: &BootstrapParams,
    ) -> Result<Vec<CommandBlock>, CoreError> {
        let hostname = require(&params.hostname, "hostname")?;
        let mgmt_ip = require(&params.mgmt_ip, "mgmt_ip")?;
        let gateway = require(&params.gateway, "gateway")?;
        let mask = normalize_mask(require(&params.mgmt_mask, "mgmt_mask")?);
        let vlan = params.mgmt_vlan.unwrap_or(1);

        let commands = vec![
            "conf t".to_string(),
            format!("hostname {}", hostname),
            format!("interface vlan {}", vlan),
            format!(" ip address {} {}", mgmt_ip, mask),
            " no shutdown".to_string(),
            "exit".to_string(),
            format!("ip default-gateway {}", gateway),
            "end".to_string(),
        ];

        Ok(vec![CommandBlock {
            name: "Bootstrap".to_string(),
            commands,
            critical: true,
            expect_prompt: None,
        }])
    }

    fn verify_commands(&self, _params: &BootstrapParams) -> Vec<String> {
        vec!["show ip interface brief".to_string()]
    }

    fn save_commands(&self, _params: &BootstrapParams) -> Vec<String> {
        vec!["write".to_string(), "copy run start".to_string()]
    }

    fn parse_verify(&self, _transcript: &str, _params: &BootstrapParams) -> VerifyReport {
        // Without vendor knowledge there is nothing reliable to assert.
        VerifyReport {
            success: true,
            details: "Generic verification complete".to_string(),
            tasks: Vec::new(),
        }
    }
}
