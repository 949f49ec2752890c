use crate::{hashing::Md5Hasher, Engine, PercentageHasher};

/// Configuration for [`Engine`].
///
/// ```
/// # use flag_engine::{Engine, EngineConfig};
/// let engine: Engine = EngineConfig::new()
///     .validate_percentage_allocations(false)
///     .to_engine();
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig<H = Md5Hasher> {
    pub(crate) hasher: H,
    pub(crate) validate_percentage_allocations: bool,
}

impl EngineConfig {
    /// Create a default configuration: MD5 hashing and validation of percentage allocations.
    pub fn new() -> Self {
        EngineConfig {
            hasher: Md5Hasher,
            validate_percentage_allocations: true,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::new()
    }
}

impl<H: PercentageHasher> EngineConfig<H> {
    /// Use a different percentage hasher. Mostly useful to pin percentages in tests.
    ///
    /// ```
    /// # use flag_engine::EngineConfig;
    /// let engine = EngineConfig::new()
    ///     .hasher(|_ids: &[&str]| 50.0)
    ///     .to_engine();
    /// ```
    pub fn hasher<H2: PercentageHasher>(self, hasher: H2) -> EngineConfig<H2> {
        EngineConfig {
            hasher,
            validate_percentage_allocations: self.validate_percentage_allocations,
        }
    }

    /// Reject environment documents where a feature's variant weights add up to more than 100
    /// percent. Enabled by default.
    pub fn validate_percentage_allocations(mut self, validate: bool) -> Self {
        self.validate_percentage_allocations = validate;
        self
    }

    /// Create a new [`Engine`] using the specified configuration.
    pub fn to_engine(self) -> Engine<H> {
        Engine::from_config(self)
    }
}
