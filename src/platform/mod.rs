//! OS abstraction: core counts, memory totals, process CPU accounting,
//! scratch locations.

pub mod pal;
