use crate::models::NewDevice;
use csv::{ReaderBuilder, Trim};

const REQUIRED_FIELDS: [&str; 4] = ["hostname", "mgmt_ip", "mask", "gateway"];

/// Result of parsing an operator-supplied device CSV. Rows are independent:
/// valid rows produce drafts even when other rows fail.
#[derive(Debug, Default)]
pub struct CsvImportOutcome {
    pub devices: Vec<NewDevice>,
    pub errors: Vec<String>,
}

/// Parse a header-driven device CSV into device drafts. Row numbers in error
/// messages are 1-based over data rows. Numeric columns (`port`,
/// `mgmt_vlan`) are only honored when digit-only.
pub fn parse_devices_csv(content: &str) -> CsvImportOutcome {
    let mut outcome = CsvImportOutcome::default();

    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(e) => {
            outcome.errors.push(format!("Invalid CSV header: {}", e));
            return outcome;
        }
    };

    for (index, record) in reader.records().enumerate() {
        let row = index + 1;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                outcome.errors.push(format!("Line {}: {}", row, e));
                continue;
            }
        };

        let field = |name: &str| -> Option<String> {
            headers
                .iter()
                .position(|h| h == name)
                .and_then(|i| record.get(i))
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .filter(|name| field(name).is_none())
            .copied()
            .collect();
        if !missing.is_empty() {
            outcome.errors.push(format!(
                "Line {}: Missing required fields: {}",
                row,
                missing.join(", ")
            ));
            continue;
        }

        outcome.devices.push(NewDevice {
            port: field("port").and_then(|v| parse_digits(&v)),
            vendor: field("vendor"),
            model: field("model"),
            hostname: field("hostname").unwrap_or_default(),
            mgmt_ip: field("mgmt_ip").unwrap_or_default(),
            mask: field("mask").unwrap_or_default(),
            gateway: field("gateway").unwrap_or_default(),
            mgmt_vlan: field("mgmt_vlan").and_then(|v| parse_digits(&v)),
            status: "pending".to_string(),
        });
    }

    outcome
}

fn parse_digits<T: std::str::FromStr>(value: &str) -> Option<T> {
    if value.chars().all(|c| c.is_ascii_digit()) {
        value.parse().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_rows_become_drafts() {
        let csv = "hostname,mgmt_ip,mask,gateway,port,vendor,mgmt_vlan\n\
                   sw1,10.0.0.1,/24,10.0.0.254,1,cisco,10\n\
                   sw2,10.0.0.2,/24,10.0.0.254,2,,\n";
        let outcome = parse_devices_csv(csv);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.devices.len(), 2);
        assert_eq!(outcome.devices[0].port, Some(1));
        assert_eq!(outcome.devices[0].vendor.as_deref(), Some("cisco"));
        assert_eq!(outcome.devices[0].mgmt_vlan, Some(10));
        assert_eq!(outcome.devices[1].vendor, None);
    }

    #[test]
    fn partial_success_keeps_valid_rows() {
        let csv = "hostname,mgmt_ip,mask,gateway\n\
                   sw1,10.0.0.1,/24,10.0.0.254\n\
                   sw2,,/24,10.0.0.254\n\
                   sw3,10.0.0.3,/24,10.0.0.254\n";
        let outcome = parse_devices_csv(csv);
        assert_eq!(outcome.devices.len(), 2);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("Line 2:"));
        assert!(outcome.errors[0].contains("mgmt_ip"));
    }

    #[test]
    fn non_numeric_port_is_ignored() {
        let csv = "hostname,mgmt_ip,mask,gateway,port\n\
                   sw1,10.0.0.1,/24,10.0.0.254,COM3\n";
        let outcome = parse_devices_csv(csv);
        assert_eq!(outcome.devices.len(), 1);
        assert_eq!(outcome.devices[0].port, None);
    }

    #[test]
    fn values_are_trimmed() {
        let csv = "hostname,mgmt_ip,mask,gateway\n\
                   \" sw1 \", 10.0.0.1 , /24 , 10.0.0.254 \n";
        let outcome = parse_devices_csv(csv);
        assert_eq!(outcome.devices.len(), 1);
        assert_eq!(outcome.devices[0].hostname, "sw1");
        assert_eq!(outcome.devices[0].mgmt_ip, "10.0.0.1");
    }
}
