//! Default implementations of [crate::probe::Prober]

pub mod tcp;
