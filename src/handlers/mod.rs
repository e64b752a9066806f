pub mod cache_handlers;
pub mod health_handlers;
pub mod media_handlers;
pub mod rental_handlers;
