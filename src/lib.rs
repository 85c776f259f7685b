//! Asynchronous order payment processing.
//!
//! An order's payment is attempted synchronously through the gateway; on a
//! decline or fault it falls back to a durable, retried, at-least-once
//! queue pipeline that drives the order and payment-request state machines
//! with exponential backoff and a dead-letter path.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod gateway;
pub mod messaging;
pub mod migrator;
pub mod repositories;
pub mod services;
