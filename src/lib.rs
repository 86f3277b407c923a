mod min_bitrate_history;
mod rtcp_iterator;
mod send_side_bandwidth_estimation;

pub use min_bitrate_history::*;
pub use rtcp_iterator::*;
pub use send_side_bandwidth_estimation::*;

pub mod api;
