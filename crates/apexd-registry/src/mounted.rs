use std::cmp::Ordering;

/// One mounted instance of a package.
///
/// Equality and ordering only look at the device and path handles, in the
/// order `loop_name`, `full_path`, `mount_point`, `device_name`,
/// `hashtree_loop_name`. `version` does not take part.
#[derive(Debug, Clone, Default)]
pub struct MountedApexData {
    pub version: i64,
    pub loop_name: String,
    pub full_path: String,
    pub mount_point: String,
    pub device_name: String,
    /// Empty when the hashtree is not backed by its own loop device.
    pub hashtree_loop_name: String,
}

impl MountedApexData {
    pub fn new(
        version: i64,
        loop_name: impl Into<String>,
        full_path: impl Into<String>,
        mount_point: impl Into<String>,
        device_name: impl Into<String>,
        hashtree_loop_name: impl Into<String>,
    ) -> Self {
        Self {
            version,
            loop_name: loop_name.into(),
            full_path: full_path.into(),
            mount_point: mount_point.into(),
            device_name: device_name.into(),
            hashtree_loop_name: hashtree_loop_name.into(),
        }
    }

    /// Non-empty loop device names held by this record.
    pub(crate) fn loop_devices(&self) -> impl Iterator<Item = &str> {
        [self.loop_name.as_str(), self.hashtree_loop_name.as_str()]
            .into_iter()
            .filter(|name| !name.is_empty())
    }

    pub(crate) fn dm_device(&self) -> Option<&str> {
        (!self.device_name.is_empty()).then_some(self.device_name.as_str())
    }

    fn sort_key(&self) -> (&str, &str, &str, &str, &str) {
        (
            self.loop_name.as_str(),
            self.full_path.as_str(),
            self.mount_point.as_str(),
            self.device_name.as_str(),
            self.hashtree_loop_name.as_str(),
        )
    }
}

impl PartialEq for MountedApexData {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for MountedApexData {}

impl PartialOrd for MountedApexData {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MountedApexData {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}
