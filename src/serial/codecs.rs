/// Line framing for the instrument's text protocol.
pub mod lines;
