pub mod blob_store;
pub mod storage_service;
