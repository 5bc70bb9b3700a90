//! Utility modules for the scanner

pub mod port_parser;
pub mod target;

pub use port_parser::{parse_port_spec, parse_port_specs};
pub use target::resolve_host;
