//! iSCSI agent desired state

use super::portal::{parse_portals, PortalSpec, DEFAULT_PORTALS};
use super::{ModelError, Parameters};
use crate::lio::{HbaType, DEFAULT_TG_PT_GP};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Placeholder in `alua_tpg` replaced by the local node name
pub const HOSTNAME_PLACEHOLDER: &str = "@hostname@";

/// A storage object named by the `luns` parameter
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BackstoreRef {
    pub hba_type: HbaType,
    pub name: String,
}

impl fmt::Display for BackstoreRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.hba_type, self.name)
    }
}

/// The full target layout one agent instance maintains
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTopology {
    pub iqn: String,
    /// LUN number to backing storage object
    pub luns: BTreeMap<u32, BackstoreRef>,
    pub initiators: BTreeSet<String>,
    /// Portal declarations, before expansion against local addresses
    pub portals: Vec<PortalSpec>,
    pub alua_tpg: String,
}

impl TargetTopology {
    pub fn from_params(params: &Parameters, hostname: &str) -> Result<Self, ModelError> {
        let iqn = params.require("iqn")?.to_lowercase();
        if !is_valid_iscsi_wwn(&iqn) {
            return Err(ModelError::invalid("iqn", format!("{} is not a valid iSCSI WWN", iqn)));
        }

        let mut initiators = BTreeSet::new();
        for initiator in params.require("initiators")?.split_whitespace() {
            let initiator = initiator.to_lowercase();
            if !is_valid_iscsi_wwn(&initiator) {
                return Err(ModelError::invalid(
                    "initiators",
                    format!("{} is not a valid iSCSI WWN", initiator),
                ));
            }
            initiators.insert(initiator);
        }

        let luns = parse_luns(params.require("luns")?)?;
        let portals = parse_portals(params.get("portals").unwrap_or(DEFAULT_PORTALS))?;
        let alua_tpg = params
            .get("alua_tpg")
            .unwrap_or(DEFAULT_TG_PT_GP)
            .replace(HOSTNAME_PLACEHOLDER, hostname);

        Ok(TargetTopology {
            iqn,
            luns,
            initiators,
            portals,
            alua_tpg,
        })
    }

    /// Every initiator maps every LUN, under the same index
    pub fn mapped_luns(&self) -> BTreeMap<&str, BTreeSet<u32>> {
        let all: BTreeSet<u32> = self.luns.keys().copied().collect();
        self.initiators
            .iter()
            .map(|initiator| (initiator.as_str(), all.clone()))
            .collect()
    }
}

/// Parse `lun:hba_type/name` triplets
pub fn parse_luns(luns: &str) -> Result<BTreeMap<u32, BackstoreRef>, ModelError> {
    let mut table = BTreeMap::new();

    for token in luns.split_whitespace() {
        let bad = |reason: &str| ModelError::invalid("luns", format!("{:?}: {}", token, reason));

        let (lun, backstore) = token
            .split_once(':')
            .ok_or_else(|| bad("expected lun:hba_type/name"))?;
        let lun = lun
            .parse::<u32>()
            .map_err(|_| bad("LUN number is not an integer"))?;
        let (hba_type, name) = backstore
            .split_once('/')
            .ok_or_else(|| bad("expected hba_type/name"))?;
        let hba_type = hba_type.parse::<HbaType>().map_err(|e| bad(&e))?;
        if name.is_empty() || name.contains('/') {
            return Err(bad("bad backstore name"));
        }

        let backstore = BackstoreRef {
            hba_type,
            name: name.to_string(),
        };
        if table.insert(lun, backstore).is_some() {
            return Err(bad("duplicate LUN number"));
        }
    }

    Ok(table)
}

/// Check iSCSI WWN syntax: `iqn.YYYY-MM.authority...`, `naa.` or `eui.` forms
pub fn is_valid_iscsi_wwn(wwn: &str) -> bool {
    if let Some(rest) = wwn.strip_prefix("iqn.") {
        let (Some(date), Some(tail)) = (rest.get(..7), rest.get(7..)) else {
            return false;
        };
        let date = date.as_bytes();
        let digits = |r: std::ops::Range<usize>| date[r].iter().all(u8::is_ascii_digit);
        let month = std::str::from_utf8(&date[5..7])
            .ok()
            .and_then(|m| m.parse::<u8>().ok());

        digits(0..4)
            && date[4] == b'-'
            && digits(5..7)
            && matches!(month, Some(1..=12))
            && tail
                .strip_prefix('.')
                .is_some_and(|name| name.contains('.') && !name.starts_with('.'))
    } else if let Some(hex) = wwn.strip_prefix("naa.") {
        hex.len() == 16
            && hex.starts_with(['1', '2', '5'])
            && hex.bytes().all(|b| b.is_ascii_hexdigit())
    } else if let Some(hex) = wwn.strip_prefix("eui.") {
        hex.len() == 16 && hex.bytes().all(|b| b.is_ascii_hexdigit())
    } else {
        false
    }
}
