//! # tw-trade
//!
//! The order side of the pipeline.
//!
//! - [`decision::DecisionEngine`]: reads the price book on every sentiment
//!   tick and sends orders when price trend and sentiment agree
//! - [`intake::OrderIntake`]: accepts orders over TCP, records them in the
//!   [`order_log`] and acknowledges each one
//!
//! The pure trading rule lives in [`signal`] and [`decision::Strategy`] so it
//! can be exercised without sockets or a price region.

pub mod decision;
pub mod intake;
pub mod order_client;
pub mod order_log;
pub mod signal;
