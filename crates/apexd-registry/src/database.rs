use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;

use crate::MountedApexData;

/// A record yielded by the enumeration methods of [`MountedApexDatabase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountedApexView<'a> {
    pub package_name: &'a str,
    pub data: &'a MountedApexData,
    /// Set on the highest-version record of `package_name`.
    pub is_latest: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MountedApexDatabase {
    mounted_apexes: BTreeMap<String, BTreeSet<MountedApexData>>,
    // Data and hashtree loop devices share one kernel namespace.
    loop_devices: BTreeSet<String>,
    dm_devices: BTreeSet<String>,
}

impl MountedApexDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_mounted_apex(
        &mut self,
        package_name: &str,
        version: i64,
        loop_name: &str,
        full_path: &str,
        mount_point: &str,
        device_name: &str,
        hashtree_loop_name: &str,
    ) {
        self.insert(
            package_name,
            MountedApexData::new(
                version,
                loop_name,
                full_path,
                mount_point,
                device_name,
                hashtree_loop_name,
            ),
        );
    }

    /// Registers `data` under `package_name`, replacing any record mounted
    /// from the same `full_path`.
    ///
    /// # Panics
    ///
    /// Panics when a loop or dm device of `data` is already held by another
    /// record. That means the block layer handed out a device this registry
    /// still considers live, and nothing built on top of it can be trusted.
    pub fn insert(&mut self, package_name: &str, data: MountedApexData) {
        let replaced = self
            .mounted_apex(package_name, &data.full_path)
            .cloned();
        self.check_unique_devices(&data, replaced.as_ref());

        if let Some(previous) = replaced {
            log::debug!(
                "replacing mounted apex {} at {} (loop={})",
                package_name,
                previous.full_path,
                previous.loop_name
            );
            self.remove_mounted_apex(package_name, &previous.full_path);
        }

        for name in data.loop_devices() {
            self.loop_devices.insert(name.to_string());
        }
        if let Some(name) = data.dm_device() {
            self.dm_devices.insert(name.to_string());
        }
        log::debug!(
            "registered mounted apex {}@{} from {} at {} (loop={}, dm={}, hashtree_loop={})",
            package_name,
            data.version,
            data.full_path,
            data.mount_point,
            data.loop_name,
            data.device_name,
            data.hashtree_loop_name
        );
        self.mounted_apexes
            .entry(package_name.to_string())
            .or_default()
            .insert(data);
    }

    /// Removes the record of `package_name` mounted from `full_path`, if any.
    pub fn remove_mounted_apex(&mut self, package_name: &str, full_path: &str) {
        let Some(records) = self.mounted_apexes.get_mut(package_name) else {
            return;
        };
        let Some(existing) = records
            .iter()
            .find(|data| data.full_path == full_path)
            .cloned()
        else {
            return;
        };

        records.remove(&existing);
        if records.is_empty() {
            self.mounted_apexes.remove(package_name);
        }
        for name in existing.loop_devices() {
            self.loop_devices.remove(name);
        }
        if let Some(name) = existing.dm_device() {
            self.dm_devices.remove(name);
        }
        log::debug!("unregistered mounted apex {package_name} from {full_path}");
    }

    pub fn mounted_apex(&self, package_name: &str, full_path: &str) -> Option<&MountedApexData> {
        self.mounted_apexes
            .get(package_name)?
            .iter()
            .find(|data| data.full_path == full_path)
    }

    /// Every record, packages in name order and records in canonical order.
    pub fn mounted_apexes(&self) -> impl Iterator<Item = MountedApexView<'_>> + '_ {
        self.mounted_apexes
            .iter()
            .flat_map(|(package_name, records)| package_views(package_name, records))
    }

    pub fn mounted_apexes_for<'a>(
        &'a self,
        package_name: &str,
    ) -> impl Iterator<Item = MountedApexView<'a>> + 'a {
        self.mounted_apexes
            .get_key_value(package_name)
            .into_iter()
            .flat_map(|(package_name, records)| package_views(package_name, records))
    }

    pub fn get_latest_mounted_apex(&self, package_name: &str) -> Option<MountedApexData> {
        self.mounted_apexes
            .get(package_name)
            .and_then(latest_of)
            .cloned()
    }

    /// Runs `action` only when the record at `full_path` is the latest
    /// mounted version of `package_name`.
    ///
    /// A stale or unknown `full_path` returns `Ok(())` without running
    /// `action`, so `Ok` does not imply the action ran.
    pub fn do_if_latest<F>(&self, package_name: &str, full_path: &str, action: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let is_latest = self
            .mounted_apexes
            .get(package_name)
            .and_then(latest_of)
            .is_some_and(|latest| latest.full_path == full_path);
        if !is_latest {
            log::debug!("skipping action for {package_name} at {full_path}: not the latest");
            return Ok(());
        }
        action()
    }

    pub fn len(&self) -> usize {
        self.mounted_apexes.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.mounted_apexes.is_empty()
    }

    fn check_unique_devices(&self, data: &MountedApexData, replaced: Option<&MountedApexData>) {
        let released_loops: Vec<&str> = replaced
            .map(|previous| previous.loop_devices().collect())
            .unwrap_or_default();
        let released_dm = replaced.and_then(MountedApexData::dm_device);

        if !data.loop_name.is_empty() && data.loop_name == data.hashtree_loop_name {
            panic!("Duplicate loop device: {}", data.loop_name);
        }
        for name in data.loop_devices() {
            if self.loop_devices.contains(name) && !released_loops.contains(&name) {
                panic!("Duplicate loop device: {name}");
            }
        }
        if let Some(name) = data.dm_device() {
            if self.dm_devices.contains(name) && released_dm != Some(name) {
                panic!("Duplicate dm device: {name}");
            }
        }
    }
}

fn package_views<'a>(
    package_name: &'a str,
    records: &'a BTreeSet<MountedApexData>,
) -> impl Iterator<Item = MountedApexView<'a>> + 'a {
    let latest_path = latest_of(records).map(|latest| latest.full_path.as_str());
    records.iter().map(move |data| MountedApexView {
        package_name,
        data,
        is_latest: Some(data.full_path.as_str()) == latest_path,
    })
}

/// First record in canonical order among those with the highest version.
fn latest_of(records: &BTreeSet<MountedApexData>) -> Option<&MountedApexData> {
    records.iter().fold(None, |best, data| match best {
        Some(best) if best.version >= data.version => Some(best),
        _ => Some(data),
    })
}
