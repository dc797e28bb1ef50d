// CLUSTERPLUG -- HYSTERESIS CPU HOTPLUG GOVERNOR
// LIBRARY TARGET: THE POLICY AND ENGINE MODULES ARE PURE ENOUGH TO BE
// EXERCISED OFFLINE FROM tests/ WITH MOCK COLLABORATORS.

pub mod cli;
pub mod engine;
pub mod event;
pub mod ledger;
pub mod policy;
pub mod surface;
pub mod sysfs;
pub mod timer;
