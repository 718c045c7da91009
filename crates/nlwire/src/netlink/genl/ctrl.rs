//! Schema of the generic netlink controller family.
//!
//! The controller (family id 0x10) answers `CTRL_CMD_GETFAMILY` requests
//! with one record per family. [`family_schema`] decodes and encodes those
//! records; [`FamilyInfo`] is the typed view the connection caches.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use super::{CtrlAttr, CtrlAttrMcastGrp, CtrlAttrOp, GENL_NAMSIZ};
use crate::netlink::codec::{Bitmask, BitmaskSpec, FieldCodec, Record, Schema, Value, Width};
use crate::netlink::error::{Error, Result};

/// Flags of a family operation (`GENL_ADMIN_PERM`, `GENL_CMD_CAP_*`, ...).
pub static OPERATION_FLAGS: BitmaskSpec = BitmaskSpec {
    width: Width::U32,
    flags: &[
        ("admin_perm", 0x01),
        ("cmd_cap_do", 0x02),
        ("cmd_cap_dump", 0x04),
        ("cmd_cap_haspol", 0x08),
        ("uns_admin_perm", 0x10),
    ],
};

static FAMILY: LazyLock<Arc<Schema>> = LazyLock::new(|| {
    let operation = Schema::new("operation")
        .field(CtrlAttrOp::Id as u16, "id", FieldCodec::U32)
        .field(
            CtrlAttrOp::Flags as u16,
            "flags",
            FieldCodec::Bitmask(&OPERATION_FLAGS),
        );
    let mcast_group = Schema::new("mcast_group")
        .field(
            CtrlAttrMcastGrp::Name as u16,
            "name",
            FieldCodec::Str { max_len: None },
        )
        .field(CtrlAttrMcastGrp::Id as u16, "id", FieldCodec::U32);

    Arc::new(
        Schema::new("family")
            .field(CtrlAttr::FamilyId as u16, "family_id", FieldCodec::U16)
            .field(
                CtrlAttr::FamilyName as u16,
                "family_name",
                FieldCodec::Str {
                    max_len: Some(GENL_NAMSIZ),
                },
            )
            .field(CtrlAttr::Version as u16, "version", FieldCodec::U32)
            .field(CtrlAttr::HdrSize as u16, "hdrsize", FieldCodec::U32)
            .field(CtrlAttr::MaxAttr as u16, "maxattr", FieldCodec::U32)
            .field(
                CtrlAttr::Ops as u16,
                "ops",
                FieldCodec::array(FieldCodec::record(operation)),
            )
            .field(
                CtrlAttr::McastGroups as u16,
                "mcast_groups",
                FieldCodec::array(FieldCodec::record(mcast_group)),
            ),
    )
});

/// Schema of a controller family record.
pub fn family_schema() -> &'static Arc<Schema> {
    &FAMILY
}

/// An operation supported by a family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationInfo {
    pub id: u32,
    pub flags: Bitmask,
}

/// Information about a GENL family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyInfo {
    /// Family ID (dynamically assigned by kernel)
    pub id: u16,
    pub name: String,
    /// Family version
    pub version: u32,
    /// Size of the family-specific header
    pub hdr_size: u32,
    /// Maximum attribute number
    pub max_attr: u32,
    pub ops: Vec<OperationInfo>,
    /// Multicast group name to id
    pub mcast_groups: BTreeMap<String, u32>,
}

impl FamilyInfo {
    /// Build the typed view of a decoded controller record.
    pub fn from_record(record: &Record) -> Result<Self> {
        let id = record
            .get(CtrlAttr::FamilyId as u16)
            .and_then(Value::as_u16)
            .ok_or_else(|| Error::InvalidMessage("family record without an id".into()))?;
        let u32_field = |attr: CtrlAttr| {
            record
                .get(attr as u16)
                .and_then(Value::as_u32)
                .unwrap_or(0)
        };

        let mut info = FamilyInfo {
            id,
            name: record
                .get(CtrlAttr::FamilyName as u16)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            version: u32_field(CtrlAttr::Version),
            hdr_size: u32_field(CtrlAttr::HdrSize),
            max_attr: u32_field(CtrlAttr::MaxAttr),
            ops: Vec::new(),
            mcast_groups: BTreeMap::new(),
        };

        let nested = |attr: CtrlAttr| {
            record
                .get(attr as u16)
                .and_then(Value::as_array)
                .unwrap_or_default()
                .iter()
                .filter_map(Value::as_record)
        };

        for op in nested(CtrlAttr::Ops) {
            if let Some(op_id) = op.get(CtrlAttrOp::Id as u16).and_then(Value::as_u32) {
                info.ops.push(OperationInfo {
                    id: op_id,
                    flags: op
                        .get(CtrlAttrOp::Flags as u16)
                        .and_then(Value::as_bits)
                        .cloned()
                        .unwrap_or_default(),
                });
            }
        }

        for group in nested(CtrlAttr::McastGroups) {
            let name = group
                .get(CtrlAttrMcastGrp::Name as u16)
                .and_then(Value::as_str);
            let group_id = group
                .get(CtrlAttrMcastGrp::Id as u16)
                .and_then(Value::as_u32);
            if let (Some(name), Some(group_id)) = (name, group_id) {
                info.mcast_groups.insert(name.to_string(), group_id);
            }
        }

        Ok(info)
    }

    /// Record for this family, the inverse of [`from_record`](Self::from_record).
    pub fn to_record(&self) -> Record {
        let ops = self
            .ops
            .iter()
            .map(|op| {
                Value::Record(
                    Record::new()
                        .with(CtrlAttrOp::Id as u16, Value::U32(op.id))
                        .with(CtrlAttrOp::Flags as u16, Value::Bits(op.flags.clone())),
                )
            })
            .collect();
        let groups = self
            .mcast_groups
            .iter()
            .map(|(name, id)| {
                Value::Record(
                    Record::new()
                        .with(CtrlAttrMcastGrp::Name as u16, Value::Str(name.clone()))
                        .with(CtrlAttrMcastGrp::Id as u16, Value::U32(*id)),
                )
            })
            .collect();

        Record::new()
            .with(CtrlAttr::FamilyId as u16, Value::U16(self.id))
            .with(CtrlAttr::FamilyName as u16, Value::Str(self.name.clone()))
            .with(CtrlAttr::Version as u16, Value::U32(self.version))
            .with(CtrlAttr::HdrSize as u16, Value::U32(self.hdr_size))
            .with(CtrlAttr::MaxAttr as u16, Value::U32(self.max_attr))
            .with(CtrlAttr::Ops as u16, Value::Array(ops))
            .with(CtrlAttr::McastGroups as u16, Value::Array(groups))
    }

    /// Look up a multicast group id by name.
    pub fn mcast_group(&self, name: &str) -> Option<u32> {
        self.mcast_groups.get(name).copied()
    }

    /// Check whether the family supports a command.
    pub fn supports(&self, cmd: u8) -> bool {
        self.ops.iter().any(|op| op.id == u32::from(cmd))
    }
}
