pub mod gallery_item;
pub mod shipment;
