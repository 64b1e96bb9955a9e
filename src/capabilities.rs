//! Which optional attributes apply to which kind of equipment.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde_json::{Map, Value};

use crate::error::{LedgerError, LedgerResult};
use crate::models::EquipmentKind;

/// Attributes every kind may carry.
pub const COMMON_ATTRIBUTES: &[&str] = &[
    "purchase_date",
    "purchase_cost",
    "vendor",
    "warranty_expires",
];

const COMPUTER: &[&str] = &[
    "processor",
    "ram_gb",
    "storage_gb",
    "operating_system",
    "hostname",
    "mac_address",
];

static CAPABILITIES: Lazy<HashMap<EquipmentKind, Vec<&'static str>>> = Lazy::new(|| {
    let mut table: HashMap<EquipmentKind, Vec<&'static str>> = HashMap::new();
    table.insert(EquipmentKind::Laptop, COMPUTER.to_vec());
    table.insert(EquipmentKind::Desktop, COMPUTER.to_vec());
    let mut server = COMPUTER.to_vec();
    server.extend(["ip_address", "rack_location"]);
    table.insert(EquipmentKind::Server, server);
    table.insert(
        EquipmentKind::Monitor,
        vec!["screen_size_in", "resolution", "panel_type"],
    );
    table.insert(
        EquipmentKind::Printer,
        vec!["print_technology", "color", "ip_address", "network_connected"],
    );
    table.insert(
        EquipmentKind::Phone,
        vec![
            "imei",
            "phone_number",
            "carrier",
            "operating_system",
            "storage_gb",
        ],
    );
    table.insert(
        EquipmentKind::Tablet,
        vec!["imei", "operating_system", "storage_gb"],
    );
    table.insert(
        EquipmentKind::NetworkDevice,
        vec!["ip_address", "mac_address", "firmware_version", "port_count"],
    );
    table.insert(
        EquipmentKind::SoftwareLicense,
        vec!["license_key", "seats", "expires_at"],
    );
    table.insert(EquipmentKind::Peripheral, vec!["connection_type"]);
    table.insert(EquipmentKind::Other, vec!["description"]);
    table
});

/// Kind-specific optional attributes, without the common ones.
pub fn optional_attributes(kind: EquipmentKind) -> &'static [&'static str] {
    CAPABILITIES.get(&kind).map(Vec::as_slice).unwrap_or(&[])
}

pub fn allows(kind: EquipmentKind, attribute: &str) -> bool {
    COMMON_ATTRIBUTES.contains(&attribute) || optional_attributes(kind).contains(&attribute)
}

/// Rejects attributes that do not apply to `kind` and values that are not
/// scalars.
pub fn validate_attributes(kind: EquipmentKind, attributes: &Map<String, Value>) -> LedgerResult<()> {
    for (key, value) in attributes {
        if !allows(kind, key) {
            return Err(LedgerError::invalid(
                "attributes",
                format!("'{key}' does not apply to {kind}"),
            ));
        }
        if matches!(value, Value::Array(_) | Value::Object(_)) {
            return Err(LedgerError::invalid(
                "attributes",
                format!("'{key}' must be a scalar value"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_kind_has_an_entry() {
        for kind in EquipmentKind::ALL {
            assert!(CAPABILITIES.contains_key(kind), "{kind} missing");
        }
    }

    #[test]
    fn attributes_are_checked_against_the_kind() {
        let laptop = json!({ "ram_gb": 16, "vendor": "Acme" });
        let Value::Object(laptop) = laptop else { unreachable!() };
        assert!(validate_attributes(EquipmentKind::Laptop, &laptop).is_ok());

        let Value::Object(license) = json!({ "screen_size_in": 27 }) else { unreachable!() };
        let err = validate_attributes(EquipmentKind::SoftwareLicense, &license).unwrap_err();
        assert!(err.to_string().contains("screen_size_in"));

        let Value::Object(nested) = json!({ "ram_gb": [8, 8] }) else { unreachable!() };
        assert!(validate_attributes(EquipmentKind::Desktop, &nested).is_err());
    }

    #[test]
    fn servers_extend_the_computer_set() {
        assert!(allows(EquipmentKind::Server, "rack_location"));
        assert!(allows(EquipmentKind::Server, "hostname"));
        assert!(!allows(EquipmentKind::Laptop, "rack_location"));
    }
}
