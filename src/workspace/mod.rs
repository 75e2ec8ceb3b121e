pub mod export;
pub mod listing;
pub mod moves;
pub mod mutation;
pub mod navigation;
pub mod picker;
pub mod projection;
pub mod selection;
pub mod thumbnails;
