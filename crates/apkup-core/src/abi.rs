use apkup_backend::{Abi, DeviceProfile};

/// Package specific spelling of each ABI, as used in asset names and URLs.
pub type AbiNames = &'static [(Abi, &'static str)];

/// Narrows architecture specific variants down to the device's best match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchitectureSelector {
    device_abis: Vec<Abi>,
}

impl ArchitectureSelector {
    #[must_use]
    pub fn new(device_abis: Vec<Abi>) -> Self {
        Self { device_abis }
    }

    #[must_use]
    pub fn for_device(profile: &DeviceProfile) -> Self {
        Self::new(profile.abis.clone())
    }

    #[must_use]
    pub fn device_abis(&self) -> &[Abi] {
        &self.device_abis
    }

    /// First device ABI, in device preference order, that `supported` contains.
    #[must_use]
    pub fn best_abi(&self, supported: &[Abi]) -> Option<Abi> {
        self.device_abis
            .iter()
            .copied()
            .find(|abi| supported.contains(abi))
    }

    /// Pick the variant of `table` matching the most preferred device ABI.
    #[must_use]
    pub fn select<T: Copy>(&self, table: &[(Abi, T)]) -> Option<(Abi, T)> {
        self.device_abis.iter().find_map(|abi| {
            table
                .iter()
                .find(|(candidate, _)| candidate == abi)
                .copied()
        })
    }
}
