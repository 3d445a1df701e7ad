//! Peripheral topology: DUTs, labstations and the servos linking them.
//!
//! A DUT's servo either sits on a labstation port, runs in a container, or is
//! absent. Labstations carry a list of the servos they host; this module keeps
//! that list consistent with the DUT records.

pub mod manager;
pub mod servo;

pub use manager::{
    create_dut, create_labstation, delete_dut, delete_labstation, get_dut, get_labstation,
    update_dut,
};
pub use servo::{check_conflicts, prepare_servo, validate_servo};
