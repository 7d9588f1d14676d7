//! Volume enumeration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use sysinfo::Disks;

/// A mounted volume as the consumer sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    pub mount_point: String,
    pub file_system: String,
    pub is_removable: bool,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl Volume {
    /// The fields that decide whether two volume lists differ. Space figures move on
    /// every write and are left out.
    pub fn identity(&self) -> (&str, &str, &str, bool) {
        (&self.name, &self.mount_point, &self.file_system, self.is_removable)
    }
}

/// True if both lists hold the same volumes, ignoring space figures.
pub fn same_volumes(a: &[Volume], b: &[Volume]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.identity() == y.identity())
}

/// Where the monitor gets the current volume list from.
pub trait VolumeSource: Send + Sync {
    /// Current volumes, sorted by mount point.
    fn volumes(&self) -> Vec<Volume>;
}

/// Reads mounted disks through `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoVolumeSource;

impl VolumeSource for SysinfoVolumeSource {
    fn volumes(&self) -> Vec<Volume> {
        let disks = Disks::new_with_refreshed_list();
        let mut volumes: Vec<Volume> = disks
            .list()
            .iter()
            .filter(|disk| !is_pseudo_mount(disk.mount_point()))
            .map(|disk| {
                let mount_point = disk.mount_point().to_string_lossy().to_string();
                let name = disk.name().to_string_lossy().to_string();
                Volume {
                    name: if name.is_empty() { mount_point.clone() } else { name },
                    mount_point,
                    file_system: disk.file_system().to_string_lossy().to_string(),
                    is_removable: disk.is_removable(),
                    total_bytes: disk.total_space(),
                    available_bytes: disk.available_space(),
                }
            })
            .collect();
        sort_volumes(&mut volumes);
        volumes.dedup_by(|a, b| a.mount_point == b.mount_point);
        volumes
    }
}

pub(crate) fn sort_volumes(volumes: &mut [Volume]) {
    volumes.sort_by(|a, b| a.mount_point.cmp(&b.mount_point));
}

/// System mounts nobody browses into.
fn is_pseudo_mount(mount_point: &Path) -> bool {
    let path = mount_point.to_string_lossy();
    path.starts_with("/System/Volumes/")
        || path.starts_with("/proc")
        || path.starts_with("/sys")
        || path.starts_with("/dev")
        || path.starts_with("/snap/")
        || path.starts_with("/private/var/vm")
}
