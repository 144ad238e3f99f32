#![allow(clippy::useless_conversion)]

pub mod gallery_item;
pub mod shipment;
pub mod tags;
