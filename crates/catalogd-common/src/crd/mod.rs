//! Custom Resource Definitions for catalogd

mod addons_configuration;

pub use addons_configuration::{
    bounded_message, Addon, AddonStatus, AddonStatusReason, AddonsConfiguration,
    AddonsConfigurationPhase, AddonsConfigurationSpec, AddonsConfigurationStatus,
    ClusterAddonsConfiguration, ClusterAddonsConfigurationSpec, CommonAddonsConfigurationSpec,
    RepositoryStatusReason, SpecRepository, StatusRepository, MAX_MESSAGE_LEN,
};
