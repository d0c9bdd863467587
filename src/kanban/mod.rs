pub mod codec;
pub mod data;
pub mod endpoints;
pub mod gateway;
pub mod store;
pub mod view;
