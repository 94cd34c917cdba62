//! Provisioning of the trigger-based change capture.

mod provisioner;

pub use provisioner::{CaptureInstaller, CaptureProvisioner};
