//! Batch PDF to image conversion service
//!
//! Clients upload a batch of PDFs, start a conversion, and poll a job
//! identifier while each file is rasterized in the background. Successful
//! pages are packaged into a single ZIP for download, and expired jobs are
//! purged by a periodic retention sweep.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
