//! Foreign function boundary
//!
//! Heap objects never move, so a `ref T` is passed to C as the payload
//! address and a record's bytes are already in C order when its layout
//! verifies against [`verify_c_layout`]. This module provides:
//!
//! - **marshal**: scalar and reference loads/stores at raw addresses, and
//!   conversion of values into C argument words
//! - **abi**: the C layout check for records

pub mod abi;
pub mod marshal;

pub use abi::{c_layout, verify_c_layout, AbiError, CLayout};
pub use marshal::{
    check_scalar, load_ref, load_scalar, store_ref, store_scalar, to_foreign, ForeignArg, ForeignArgs,
    MarshalError,
};
