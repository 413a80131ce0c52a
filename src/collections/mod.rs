//! Pure machine selection logic.
//!
//! Decides which cluster-api machines belong to an etcd cluster. Nothing in
//! here talks to an etcd member; listing goes through [`MachineInventory`].
//!
//! ## Module Structure
//!
//! - [`selector`]: Typed label selectors with a canonical string form
//! - [`filters`]: `MachineFilter` predicates and `and`/`or`/`not` combinators
//! - [`machines`]: The `Machines` collection and the fleet inventory seam

pub mod filters;
pub mod machines;
pub mod selector;

pub use filters::MachineFilter;
pub use machines::{
    InventoryError, KubeMachineInventory, MachineInventory, Machines,
    get_filtered_machines_for_cluster,
};
pub use selector::{Operator, Requirement, Selector, SelectorError, etcd_plane_selector_for_cluster};
