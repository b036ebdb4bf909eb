//! Sender pool: the discovery loop and the per-endpoint sender tasks it
//! spawns.

pub mod manager;
pub mod worker;

#[cfg(test)]
mod tests;
