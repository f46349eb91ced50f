//! Domain layer: aggregates, value objects, events and the pricing/fulfillment services.
pub mod aggregates;
pub mod events;
pub mod services;
pub mod value_objects;
