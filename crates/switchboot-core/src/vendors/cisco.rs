use super::{require, VendorAdapter};
use crate::error::CoreError;
use crate::models::{BootstrapParams, CommandBlock, VerifyReport, VerifyStatus, VerifyTask};
use crate::policy::normalize_mask;
use regex::Regex;

/// Cisco IOS adapter. The bootstrap splits into three blocks so that a CLI
/// rejection in the save phase cannot undo an already applied baseline.
pub struct CiscoVendor;

impl CiscoVendor {
    fn baseline_commands(&self, params: &BootstrapParams) -> Result<Vec<String>, CoreError> {
        let hostname = require(&params.hostname, "hostname")?;
        let mgmt_ip = require(&params.mgmt_ip, "mgmt_ip")?;
        let gateway = require(&params.gateway, "gateway")?;
        let mask = normalize_mask(require(&params.mgmt_mask, "mgmt_mask")?);
        let vlan = params.mgmt_vlan.unwrap_or(1);

        let mut commands = vec![format!("hostname {}", hostname)];
        if let Some(vlan) = params.mgmt_vlan {
            commands.push(format!("vlan {}", vlan));
            commands.push("exit".to_string());
        }
        commands.extend([
            format!("interface Vlan{}", vlan),
            format!(" ip address {} {}", mgmt_ip, mask),
            " no shutdown".to_string(),
            "exit".to_string(),
            format!("ip default-gateway {}", gateway),
            "line vty 0 4".to_string(),
            " transport input ssh".to_string(),
            " login local".to_string(),
            "exit".to_string(),
        ]);
        Ok(commands)
    }
}

impl VendorAdapter for CiscoVendor {
    fn vendor_id(&self) -> &'static str {
        "cisco"
    }

    fn detect(&self, transcript: &str) -> f32 {
        let lowered = transcript.to_lowercase();
        if lowered.contains("cisco") || lowered.contains("ios") {
            0.9
        } else {
            0.0
        }
    }

    fn bootstrap_commands(
        &self,
        params: &BootstrapParams,
    ) -> Result<Vec<CommandBlock>, CoreError> {
        Ok(vec![
            CommandBlock {
                name: "Enter Configuration".to_string(),
                commands: vec!["en".to_string(), "conf t".to_string()],
                critical: true,
                expect_prompt: None,
            },
            CommandBlock {
                name: "Apply Baseline".to_string(),
                commands: self.baseline_commands(params)?,
                critical: true,
                expect_prompt: None,
            },
            CommandBlock {
                name: "Save Configuration".to_string(),
                commands: vec!["end".to_string(), "write memory".to_string()],
                critical: false,
                expect_prompt: None,
            },
        ])
    }

    fn verify_commands(&self, params: &BootstrapParams) -> Vec<String> {
        let mut commands = vec![
            "show ip interface brief".to_string(),
            "show vlan brief".to_string(),
            "show ip ssh".to_string(),
        ];
        if let Some(vlan) = params.mgmt_vlan {
            commands.push(format!("show running-config interface Vlan{}", vlan));
        }
        commands
    }

    fn save_commands(&self, _params: &BootstrapParams) -> Vec<String> {
        vec!["write memory".to_string()]
    }

    fn parse_verify(&self, transcript: &str, params: &BootstrapParams) -> VerifyReport {
        let mut tasks = Vec::new();
        let mut issues = Vec::new();

        // Hostname: the prompt should have changed to the configured name.
        if !params.hostname.is_empty() {
            let hostname = &params.hostname;
            let prompt_matched = Regex::new(&format!(r"(?m)^{}[>#]", regex::escape(hostname)))
                .map(|re| re.is_match(transcript))
                .unwrap_or(false);
            let passed = prompt_matched || transcript.contains(hostname.as_str());
            push_task(
                &mut tasks,
                &mut issues,
                "Verify Hostname",
                passed,
                format!("Hostname set to {}", hostname),
                "Hostname mismatch".to_string(),
                "HOSTNAME_MATCH",
                "HOSTNAME_MISMATCH",
            );
        }

        // Management IP must show up in the interface summary.
        if !params.mgmt_ip.is_empty() {
            let mgmt_ip = &params.mgmt_ip;
            let passed = transcript.contains(mgmt_ip.as_str());
            push_task(
                &mut tasks,
                &mut issues,
                "Verify IP Address",
                passed,
                format!("IP {} found", mgmt_ip),
                format!("IP {} not found", mgmt_ip),
                "IP_MATCH",
                "IP_MISMATCH",
            );
        }

        // The management VLAN row must be present and active.
        if let Some(vlan) = params.mgmt_vlan {
            let passed = Regex::new(&format!(r"(?mi)(^|\s){}\s+.*\bactive\b", vlan))
                .map(|re| re.is_match(transcript))
                .unwrap_or(false);
            push_task(
                &mut tasks,
                &mut issues,
                &format!("Verify VLAN {}", vlan),
                passed,
                format!("VLAN {} is active", vlan),
                format!("VLAN {} not active/found", vlan),
                "VLAN_MATCH",
                "VLAN_MISMATCH",
            );
        }

        // SSH transport.
        let ssh_passed = transcript.contains("SSH Enabled") || transcript.contains("SSH ver");
        push_task(
            &mut tasks,
            &mut issues,
            "Verify SSH",
            ssh_passed,
            "SSH is enabled".to_string(),
            "SSH disabled".to_string(),
            "SSH_ENABLED",
            "SSH_DISABLED",
        );

        let success = issues.is_empty();
        let details = if success {
            "All checks passed".to_string()
        } else {
            issues.join("; ")
        };
        VerifyReport {
            success,
            details,
            tasks,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn push_task(
    tasks: &mut Vec<VerifyTask>,
    issues: &mut Vec<String>,
    name: &str,
    passed: bool,
    pass_message: String,
    fail_message: String,
    pass_code: &str,
    fail_code: &str,
) {
    if !passed {
        issues.push(fail_message.clone());
    }
    tasks.push(VerifyTask {
        name: name.to_string(),
        status: if passed {
            VerifyStatus::Success
        } else {
            VerifyStatus::Failed
        },
        message: if passed { pass_message } else { fail_message },
        code: if passed { pass_code } else { fail_code }.to_string(),
    });
}
