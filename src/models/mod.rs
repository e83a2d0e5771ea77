pub mod conversion;
pub mod job;
