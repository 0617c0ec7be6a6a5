pub mod backfill;
pub mod stream;
