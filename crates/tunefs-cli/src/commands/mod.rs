pub mod check;
pub mod mount;
pub mod scan;
