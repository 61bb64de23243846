//! Runtime tests, driven by JSON program IR

mod helpers;

mod coexpr_tests;
mod error_tests;
