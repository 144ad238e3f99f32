pub mod gallery;
pub mod health;
pub mod images;
pub mod info;
pub mod shipments;
pub mod url_mappings;
