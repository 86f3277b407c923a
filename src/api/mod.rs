/// The unit types used throughout the crate: [DataRate](units::DataRate),
/// [TimeDelta](units::TimeDelta) and [Timestamp](units::Timestamp).
pub mod units;
