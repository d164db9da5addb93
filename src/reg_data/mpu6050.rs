//! MPU-6050 register map, as per the datasheet register map revision 4.2.

#![allow(dead_code)]

pub const DEFAULT_SLAVE_ADDR: u8 = 0x68;

#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug)]
pub struct PWR_MGMT_1;

impl PWR_MGMT_1 {
    pub const ADDR: u8 = 0x6B;
    pub const TEMP_DIS: u8 = 1 << 3;
    pub const CLK_PLL_ZGYRO: u8 = 0x03;
}

#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug)]
pub struct CONFIG;

impl CONFIG {
    pub const ADDR: u8 = 0x1A;
}

#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug)]
pub struct SMPRT_DIV;

impl SMPRT_DIV {
    pub const ADDR: u8 = 0x19;
}

#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug)]
pub struct GYRO_CONFIG;

impl GYRO_CONFIG {
    pub const ADDR: u8 = 0x1B;
    pub const FS_SEL_SHIFT: u8 = 3;
}

#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug)]
pub struct ACCEL_CONFIG;

impl ACCEL_CONFIG {
    pub const ADDR: u8 = 0x1C;
    pub const FS_SEL_SHIFT: u8 = 3;
}

#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug)]
pub struct INT_ENABLE;

impl INT_ENABLE {
    pub const ADDR: u8 = 0x38;
    pub const DATA_RDY_EN: u8 = 1 << 0;
    pub const MOT_EN: u8 = 1 << 6;
}

#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug)]
pub struct INT_STATUS;

impl INT_STATUS {
    pub const ADDR: u8 = 0x3A;
    pub const DATA_RDY_INT: u8 = 1 << 0;
}

/// First of the fourteen consecutive measurement registers
/// (accel x/y/z, temperature, gyro x/y/z, high byte first).
pub const ACCEL_XOUT_H: u8 = 0x3B;
pub const TEMP_OUT_H: u8 = 0x41;
pub const GYRO_XOUT_H: u8 = 0x43;

/// Gyro full-scale range in degrees per second, indexed by FS_SEL.
pub const GYRO_RANGE_DPS: [i16; 4] = [250, 500, 1000, 2000];

/// Accelerometer full-scale range in g, indexed by AFS_SEL.
pub const ACCEL_RANGE_G: [i16; 4] = [2, 4, 8, 16];

/// Gyro sensitivity in LSB per degree per second, indexed by FS_SEL.
pub const GYRO_SENS: [f32; 4] = [131.0, 65.5, 32.8, 16.4];
