//! # tw-feed
//!
//! The price side of the pipeline.
//!
//! ## Roles
//!
//! - [`source::PriceNewsSource`]: generates price and sentiment ticks and
//!   broadcasts them on two TCP endpoints
//! - [`relay::PriceRelay`]: subscribes to the price endpoint and writes every
//!   tick into the shared price book
//!
//! ## Shared infrastructure
//!
//! - [`fanout`]: per-subscriber queues + writer tasks behind one publisher
//! - [`generator`]: random-walk prices and random sentiment
//! - [`subscriber`]: reconnecting tick subscriber with exponential backoff

pub mod fanout;
pub mod generator;
pub mod relay;
pub mod source;
pub mod subscriber;
