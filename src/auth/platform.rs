use oso::PolarClass;
use serde::{Deserialize, Serialize};

/// The single tenant every ride belongs to. Platform-wide roles (rider, driver, admin,
/// system) are granted on it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform;

impl Platform {
    pub fn new() -> Self {
        Self
    }
}

impl PolarClass for Platform {
    fn get_polar_class_builder() -> oso::ClassBuilder<Platform> {
        oso::Class::builder()
            .name("Platform")
            .with_equality_check()
            .add_class_method("instance", Platform::new)
    }

    fn get_polar_class() -> oso::Class {
        Platform::get_polar_class_builder().build()
    }
}
