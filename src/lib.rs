#![cfg_attr(not(test), no_std)]

pub mod bus;
pub mod filter;
pub mod mpu6050;

pub(crate) mod reg_data;

pub use bus::{Bus, BusError, Direction, TwiMaster, TwiRegisters};
pub use filter::{AngleEstimator, FixedPointFilter, TrigFilter};
pub use mpu6050::{Error, Mpu6050, MpuConfig, RawSample};
