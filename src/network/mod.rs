//! Network module - address range expansion and validation

mod range;

pub use range::{
    expand_range, is_special_address, parse_network, parse_single_address, usable_host_count,
};
