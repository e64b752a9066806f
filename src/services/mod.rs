pub mod cache_service;
pub mod hashing;
pub mod media_caches;
pub mod media_service;
pub mod path_organizer;
pub mod rental_days;
