use crate::models::{Device, ValidationError};
use crate::serial::MAX_PORTS;
use lazy_static::lazy_static;
use regex::Regex;
use std::net::Ipv4Addr;

lazy_static! {
    static ref HOSTNAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9-]{1,63}$").unwrap();
}

/// Normalizes a mask (prefix length or dotted decimal) to dotted decimal.
/// `/24` and `24` both become `255.255.255.0`; anything else is returned
/// trimmed and left for `validate_device` to reject.
pub fn normalize_mask(mask: &str) -> String {
    let mask = mask.trim();
    let prefix = mask.strip_prefix('/').unwrap_or(mask);
    if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(len) = prefix.parse::<u8>() {
            if let Some(dotted) = prefix_to_dotted(len) {
                return dotted;
            }
        }
    }
    mask.to_string()
}

fn prefix_to_dotted(prefix: u8) -> Option<String> {
    if !(1..=32).contains(&prefix) {
        return None;
    }
    let bits: u32 = u32::MAX << (32 - u32::from(prefix));
    Some(Ipv4Addr::from(bits).to_string())
}

// A netmask is valid when its bit pattern is a contiguous run of ones
// followed by zeros, and at least one bit is set.
fn is_contiguous_netmask(mask: Ipv4Addr) -> bool {
    let bits = u32::from(mask);
    if bits == 0 {
        return false;
    }
    let inverted = !bits;
    inverted & inverted.wrapping_add(1) == 0
}

/// Validate one device against the policy rules, given every device in its
/// job (for duplicate checks). Pure and order-independent; callers aggregate
/// the results across devices.
pub fn validate_device(device: &Device, all_devices: &[Device]) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // 1) Hostname
    if !HOSTNAME_REGEX.is_match(&device.hostname) {
        errors.push(ValidationError {
            field: "hostname".to_string(),
            device_id: Some(device.id),
            row: None,
            message: format!(
                "Invalid hostname: '{}'. Must be 1-63 chars, alphanumeric or hyphen, no spaces.",
                device.hostname
            ),
            suggestion: Some("Use something like 'sw-lab-01'.".to_string()),
        });
    }

    // 2) Management IP and mask
    let ip: Option<Ipv4Addr> = match device.mgmt_ip.parse() {
        Ok(ip) => Some(ip),
        Err(_) => {
            errors.push(ValidationError {
                field: "mgmt_ip".to_string(),
                device_id: Some(device.id),
                row: None,
                message: format!("Invalid IPv4 address: '{}'.", device.mgmt_ip),
                suggestion: None,
            });
            None
        }
    };

    let norm_mask = normalize_mask(&device.mask);
    let mask: Option<Ipv4Addr> = match norm_mask.parse::<Ipv4Addr>() {
        Ok(m) if is_contiguous_netmask(m) => Some(m),
        _ => {
            errors.push(ValidationError {
                field: "mask".to_string(),
                device_id: Some(device.id),
                row: None,
                message: format!("Invalid subnet mask: '{}'.", device.mask),
                suggestion: None,
            });
            None
        }
    };

    // 3) Gateway inside the management subnet
    if let (Some(ip), Some(mask)) = (ip, mask) {
        match device.gateway.parse::<Ipv4Addr>() {
            Ok(gateway) => {
                let mask_bits = u32::from(mask);
                if u32::from(gateway) & mask_bits != u32::from(ip) & mask_bits {
                    errors.push(ValidationError {
                        field: "gateway".to_string(),
                        device_id: Some(device.id),
                        row: None,
                        message: format!(
                            "Gateway '{}' is not in the same subnet as IP '{}/{}'.",
                            device.gateway, device.mgmt_ip, norm_mask
                        ),
                        suggestion: None,
                    });
                }
            }
            Err(_) => {
                errors.push(ValidationError {
                    field: "gateway".to_string(),
                    device_id: Some(device.id),
                    row: None,
                    message: format!("Invalid Gateway IPv4: '{}'.", device.gateway),
                    suggestion: None,
                });
            }
        }
    }

    // 4) Duplicate management IP within the job
    if let Some(conflict) = all_devices
        .iter()
        .find(|d| d.id != device.id && d.mgmt_ip == device.mgmt_ip)
    {
        errors.push(ValidationError {
            field: "mgmt_ip".to_string(),
            device_id: Some(device.id),
            row: None,
            message: format!(
                "Duplicate management IP '{}' found in the same job.",
                device.mgmt_ip
            ),
            suggestion: Some(format!("Conflict with device ID {}.", conflict.id)),
        });
    }

    // 5) Duplicate console port within the job
    if let Some(port) = device.port {
        if let Some(conflict) = all_devices
            .iter()
            .find(|d| d.id != device.id && d.port == Some(port))
        {
            errors.push(ValidationError {
                field: "port".to_string(),
                device_id: Some(device.id),
                row: None,
                message: format!(
                    "Port {} is already assigned to another device in this job.",
                    port
                ),
                suggestion: Some(format!("Conflict with device ID {}.", conflict.id)),
            });
        }
    }

    // 6) VLAN range
    if let Some(vlan) = device.mgmt_vlan {
        if !(1..=4094).contains(&vlan) {
            errors.push(ValidationError {
                field: "mgmt_vlan".to_string(),
                device_id: Some(device.id),
                row: None,
                message: format!("Invalid VLAN: {}. Must be between 1 and 4094.", vlan),
                suggestion: None,
            });
        }
    }

    // 7) Port range
    if let Some(port) = device.port {
        if !(1..=MAX_PORTS).contains(&port) {
            errors.push(ValidationError {
                field: "port".to_string(),
                device_id: Some(device.id),
                row: None,
                message: format!(
                    "Invalid port: {}. The controller only exposes ports 1-{}.",
                    port, MAX_PORTS
                ),
                suggestion: None,
            });
        }
    }

    errors
}
