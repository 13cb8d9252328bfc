//! Device selection.

use crate::core::error::{ComputeError, ComputeResult};
use crate::core::types::{DeviceInfo, DeviceType};

/// Pick the first device whose type intersects `wanted`, falling back to the
/// first device overall.
///
/// Strict first-match in enumeration order; an empty list is a discovery
/// failure.
pub fn select_device(devices: &[DeviceInfo], wanted: DeviceType) -> ComputeResult<&DeviceInfo> {
    let first = devices
        .first()
        .ok_or_else(|| ComputeError::Discovery("no devices to select from".to_string()))?;
    match devices.iter().find(|d| d.device_type.intersects(wanted)) {
        Some(device) => Ok(device),
        None => {
            log::debug!(
                "no {} device found, falling back to '{}' ({})",
                wanted,
                first.name,
                first.device_type
            );
            Ok(first)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostDevice;
    use crate::core::types::DeviceId;
    use proptest::prelude::*;

    fn devices(kinds: &[DeviceType]) -> Vec<DeviceInfo> {
        kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| {
                let mut info = HostDevice::cpu(&format!("dev{i}")).info;
                info.id = DeviceId(i as u64 + 1);
                info.device_type = *kind;
                info
            })
            .collect()
    }

    #[test]
    fn test_first_match_wins() {
        let list = devices(&[DeviceType::CPU, DeviceType::GPU, DeviceType::GPU]);
        assert_eq!(select_device(&list, DeviceType::GPU).unwrap().name, "dev1");
    }

    #[test]
    fn test_gpu_requested_only_cpus_falls_back() {
        let list = devices(&[DeviceType::CPU, DeviceType::CPU]);
        let chosen = select_device(&list, DeviceType::GPU).unwrap();
        assert_eq!(chosen.name, "dev0");
        assert_eq!(chosen.device_type, DeviceType::CPU);
    }

    #[test]
    fn test_empty_list_fails() {
        assert!(matches!(
            select_device(&[], DeviceType::CPU),
            Err(ComputeError::Discovery(_))
        ));
    }

    fn kind() -> impl Strategy<Value = DeviceType> {
        prop_oneof![
            Just(DeviceType::CPU),
            Just(DeviceType::GPU),
            Just(DeviceType::ACCELERATOR),
            Just(DeviceType::CPU | DeviceType::GPU),
        ]
    }

    proptest! {
        #[test]
        fn prop_selection_is_first_match_or_first(kinds in prop::collection::vec(kind(), 1..8), wanted in kind()) {
            let list = devices(&kinds);
            let chosen = select_device(&list, wanted).unwrap();
            match kinds.iter().position(|k| k.intersects(wanted)) {
                Some(i) => prop_assert_eq!(chosen.id, list[i].id),
                None => prop_assert_eq!(chosen.id, list[0].id),
            }
        }
    }
}
