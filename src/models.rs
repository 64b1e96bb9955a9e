use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

pub const ASSETS_TABLE: &str = "assets";
pub const CUSTODY_TABLE: &str = "custody_intervals";
pub const MAINTENANCE_TABLE: &str = "maintenance_records";
pub const ASSIGNMENTS_TABLE: &str = "assignments";

/// Error returned when a stored or submitted enum label is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLabel {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownLabel {}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $( $variant:ident => $label:literal ),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[ $( $name::$variant ),+ ];

            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $label ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownLabel;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let normalized = value.trim().to_ascii_lowercase().replace([' ', '-'], "_");
                match normalized.as_str() {
                    $( $label => Ok($name::$variant), )+
                    _ => Err(UnknownLabel {
                        kind: $kind,
                        value: value.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum Entity {
    Asset,
    CustodyInterval,
    MaintenanceRecord,
    Assignment,
}

text_enum!(Entity, "entity", {
    Asset => "asset",
    CustodyInterval => "custody_interval",
    MaintenanceRecord => "maintenance_record",
    Assignment => "assignment",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum EquipmentKind {
    Laptop,
    Desktop,
    Monitor,
    Printer,
    Phone,
    Tablet,
    NetworkDevice,
    Server,
    SoftwareLicense,
    Peripheral,
    Other,
}

text_enum!(EquipmentKind, "equipment kind", {
    Laptop => "laptop",
    Desktop => "desktop",
    Monitor => "monitor",
    Printer => "printer",
    Phone => "phone",
    Tablet => "tablet",
    NetworkDevice => "network_device",
    Server => "server",
    SoftwareLicense => "software_license",
    Peripheral => "peripheral",
    Other => "other",
});

/// Operational state of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum AssetStatus {
    Available,
    InUse,
    InRepair,
    Retired,
    Disposed,
}

text_enum!(AssetStatus, "asset status", {
    Available => "available",
    InUse => "in_use",
    InRepair => "in_repair",
    Retired => "retired",
    Disposed => "disposed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum MaintenanceKind {
    Scheduled,
    Preventive,
    Corrective,
    Emergency,
}

text_enum!(MaintenanceKind, "maintenance type", {
    Scheduled => "scheduled",
    Preventive => "preventive",
    Corrective => "corrective",
    Emergency => "emergency",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum AssignmentStatus {
    Active,
    Returned,
    Overdue,
    Lost,
    Damaged,
}

text_enum!(AssignmentStatus, "assignment status", {
    Active => "active",
    Returned => "returned",
    Overdue => "overdue",
    Lost => "lost",
    Damaged => "damaged",
});

/// Current snapshot of one physical item or license.
///
/// `current_holder`, `department`, `status` and the two maintenance dates are
/// projections of the history tables. Callers never write them directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Asset {
    pub id: String,
    pub equipment_kind: EquipmentKind,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub asset_tag: Option<String>,
    pub department: Option<String>,
    pub location: Option<String>,
    pub current_holder: Option<String>,
    pub status: AssetStatus,
    #[ts(type = "number | null")]
    pub last_maintenance_date: Option<i64>,
    #[ts(type = "number | null")]
    pub next_maintenance_date: Option<i64>,
    #[serde(default)]
    #[ts(type = "Record<string, unknown>")]
    pub attributes: Map<String, Value>,
    #[ts(type = "number")]
    pub version: i64,
    #[ts(type = "number")]
    pub created_at: i64,
    #[ts(type = "number")]
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CustodyInterval {
    pub id: String,
    pub asset_id: String,
    pub holder: Option<String>,
    pub department: Option<String>,
    #[ts(type = "number")]
    pub from: i64,
    #[ts(type = "number | null")]
    pub to: Option<i64>,
    pub reason: Option<String>,
    #[ts(type = "number")]
    pub created_at: i64,
}

impl CustodyInterval {
    pub fn is_open(&self) -> bool {
        self.to.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MaintenanceRecord {
    pub id: String,
    pub asset_id: String,
    pub maintenance_type: MaintenanceKind,
    pub technician_name: String,
    #[ts(type = "number")]
    pub date_performed: i64,
    #[ts(type = "number | null")]
    pub next_maintenance_date: Option<i64>,
    pub notes: Option<String>,
    #[serde(default)]
    #[ts(type = "Record<string, unknown>")]
    pub inspection: Map<String, Value>,
    #[ts(type = "number")]
    pub created_at: i64,
    #[ts(type = "number")]
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Assignment {
    pub id: String,
    pub asset_id: String,
    pub assigned_to: String,
    pub assigned_by: String,
    #[ts(type = "number")]
    pub assignment_date: i64,
    #[ts(type = "number | null")]
    pub expected_return_date: Option<i64>,
    #[ts(type = "number | null")]
    pub actual_return_date: Option<i64>,
    pub status: AssignmentStatus,
    pub notes: Option<String>,
    #[ts(type = "number")]
    pub version: i64,
    #[ts(type = "number")]
    pub created_at: i64,
    #[ts(type = "number")]
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct NewAsset {
    #[serde(alias = "equipmentKind")]
    pub equipment_kind: EquipmentKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, alias = "serialNumber")]
    pub serial_number: Option<String>,
    #[serde(default, alias = "assetTag")]
    pub asset_tag: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub status: Option<AssetStatus>,
    #[serde(default)]
    #[ts(type = "Record<string, unknown>")]
    pub attributes: Map<String, Value>,
    #[serde(default, alias = "initialHolder")]
    pub initial_holder: Option<String>,
    #[serde(default, alias = "receivedAt")]
    #[ts(optional, type = "number")]
    pub received_at: Option<i64>,
}

impl NewAsset {
    pub fn new(equipment_kind: EquipmentKind) -> Self {
        Self {
            equipment_kind,
            model: None,
            serial_number: None,
            asset_tag: None,
            department: None,
            location: None,
            status: None,
            attributes: Map::new(),
            initial_holder: None,
            received_at: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct TransferCustody {
    #[serde(alias = "assetId")]
    pub asset_id: String,
    /// `None` returns the asset to the pool.
    #[serde(default, alias = "newHolder")]
    pub new_holder: Option<String>,
    /// `None` keeps the asset's current department.
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(alias = "occurredAt")]
    #[ts(type = "number")]
    pub occurred_at: i64,
    #[serde(default, alias = "expectedVersion")]
    #[ts(optional, type = "number")]
    pub expected_version: Option<i64>,
}

impl TransferCustody {
    pub fn to_holder(asset_id: &str, holder: &str, occurred_at: i64) -> Self {
        Self {
            asset_id: asset_id.to_string(),
            new_holder: Some(holder.to_string()),
            department: None,
            reason: None,
            occurred_at,
            expected_version: None,
        }
    }

    pub fn to_pool(asset_id: &str, occurred_at: i64) -> Self {
        Self {
            asset_id: asset_id.to_string(),
            new_holder: None,
            department: None,
            reason: None,
            occurred_at,
            expected_version: None,
        }
    }

    pub fn with_department(mut self, department: &str) -> Self {
        self.department = Some(department.to_string());
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn expecting_version(mut self, version: i64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

/// Result of a custody transfer: the interval that was closed, the one that
/// was opened, and the asset projection after both writes.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct CustodyOutcome {
    pub asset: Asset,
    pub closed: Option<CustodyInterval>,
    pub opened: Option<CustodyInterval>,
}

/// Raw maintenance form input. Required fields are optional here so that a
/// missing one can be reported by name.
#[derive(Debug, Clone, Default, Deserialize, TS)]
#[ts(export)]
pub struct NewMaintenanceRecord {
    #[serde(default, alias = "assetId")]
    pub asset_id: Option<String>,
    #[serde(default, alias = "maintenanceType")]
    pub maintenance_type: Option<MaintenanceKind>,
    #[serde(default, alias = "technicianName")]
    pub technician_name: Option<String>,
    #[serde(default, alias = "datePerformed")]
    #[ts(optional, type = "number")]
    pub date_performed: Option<i64>,
    #[serde(default, alias = "nextMaintenanceDate")]
    #[ts(optional, type = "number")]
    pub next_maintenance_date: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    #[ts(type = "Record<string, unknown>")]
    pub inspection: Map<String, Value>,
}

/// Partial update of a maintenance record. A field that is `None` is left
/// unchanged.
#[derive(Debug, Clone, Default, Deserialize, TS)]
#[ts(export)]
pub struct MaintenancePatch {
    #[serde(default, alias = "maintenanceType")]
    pub maintenance_type: Option<MaintenanceKind>,
    #[serde(default, alias = "technicianName")]
    pub technician_name: Option<String>,
    #[serde(default, alias = "datePerformed")]
    #[ts(optional, type = "number")]
    pub date_performed: Option<i64>,
    #[serde(default, alias = "nextMaintenanceDate")]
    #[ts(optional, type = "number")]
    pub next_maintenance_date: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    #[ts(optional, type = "Record<string, unknown>")]
    pub inspection: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct NewAssignment {
    #[serde(alias = "assetId")]
    pub asset_id: String,
    #[serde(alias = "assignedTo")]
    pub assigned_to: String,
    #[serde(alias = "assignedBy")]
    pub assigned_by: String,
    #[serde(default, alias = "expectedReturnDate")]
    #[ts(optional, type = "number")]
    pub expected_return_date: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct AssignmentStatusUpdate {
    #[serde(alias = "assignmentId")]
    pub assignment_id: String,
    pub status: AssignmentStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, alias = "expectedVersion")]
    #[ts(optional, type = "number")]
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct ReturnAssignment {
    #[serde(alias = "assignmentId")]
    pub assignment_id: String,
    #[serde(alias = "actualReturnDate")]
    #[ts(type = "number")]
    pub actual_return_date: i64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, alias = "expectedVersion")]
    #[ts(optional, type = "number")]
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct AssetStatusUpdate {
    #[serde(alias = "assetId")]
    pub asset_id: String,
    pub status: AssetStatus,
    #[serde(default, alias = "expectedVersion")]
    #[ts(optional, type = "number")]
    pub expected_version: Option<i64>,
}

/// Trims free text and maps blank input to `None`.
pub(crate) fn clean_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
