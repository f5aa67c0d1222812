pub mod adapter;
pub mod cache_service;
pub mod local_store;
pub mod tiered;
