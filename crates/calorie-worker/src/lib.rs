pub mod delivery;
pub mod meal_store;
pub mod uploader;
pub mod worker;
