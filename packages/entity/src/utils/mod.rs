pub mod timestamp;

pub use timestamp::{lenient_timestamp, parse_timestamp};
